//! Polling of hub bulk jobs until they reach a terminal status.

use bridge_traits::device::JobStatus;
use bridge_traits::hub::HubRegistry;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::workflow::{EffectError, RetryError, WorkflowContext};

/// Polls a job through durable retries.
///
/// `Pending` and `Running` are retried under the policy. `Succeeded` is the
/// only successful outcome; `Failed`, `Cancelled` and `Unknown` end polling
/// with [`SyncError::JobFailed`]. Running out of attempts while the job is
/// still active yields [`SyncError::JobNotReady`].
#[derive(Clone)]
pub struct JobPoller {
    hub: Arc<dyn HubRegistry>,
}

impl JobPoller {
    pub fn new(hub: Arc<dyn HubRegistry>) -> Self {
        Self { hub }
    }

    pub async fn wait_for_completion(
        &self,
        ctx: &mut WorkflowContext,
        job_id: &str,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let hub = Arc::clone(&self.hub);
        let outcome = ctx
            .call_with_retry(&format!("poll_job:{}", job_id), policy, |_| {
                let hub = Arc::clone(&hub);
                let job_id = job_id.to_string();
                async move {
                    let job = hub.get_job(&job_id).await.map_err(EffectError::from)?;
                    if job.status.is_active() {
                        Err(EffectError::transient(format!(
                            "Job {} is still {}",
                            job_id, job.status
                        )))
                    } else {
                        Ok(job.status)
                    }
                }
            })
            .await?;

        match outcome {
            Ok(JobStatus::Succeeded) => {
                if !ctx.is_replaying() {
                    info!(job_id, "Hub job completed");
                }
                Ok(())
            }
            Ok(status) => {
                if !ctx.is_replaying() {
                    warn!(job_id, status = %status, "Hub job ended unsuccessfully");
                }
                Err(SyncError::JobFailed {
                    job_id: job_id.to_string(),
                    status,
                })
            }
            Err(RetryError::Exhausted { attempts, .. }) => {
                if !ctx.is_replaying() {
                    warn!(job_id, attempts, "Hub job not complete within polling budget");
                }
                Err(SyncError::JobNotReady {
                    job_id: job_id.to_string(),
                    attempts,
                })
            }
            Err(RetryError::Permanent { error, .. }) => Err(error.into()),
        }
    }
}
