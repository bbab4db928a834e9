//! # Durable Workflow Context
//!
//! Replay-based execution for long-running orchestrations.
//!
//! ## Overview
//!
//! A workflow body is ordinary async code that performs every
//! non-deterministic step (remote calls, reading the clock, sleeping)
//! through a [`WorkflowContext`]. Each such step is an *effect*: on first
//! execution its outcome is appended to an [`EffectLog`] under a
//! monotonically increasing sequence number; when the body is executed
//! again for the same instance the recorded outcome is returned instead
//! of re-running the step.
//!
//! Re-executing a body against its history must therefore request the same
//! effects in the same order. A mismatch between the requested effect name
//! and the recorded one fails with [`SyncError::NonDeterministic`].
//!
//! ## Effects
//!
//! - [`WorkflowContext::call`]: run a fallible step once
//! - [`WorkflowContext::now`]: recorded current time
//! - [`WorkflowContext::sleep`]: durable timer; the fire time is recorded
//!   so a resumed workflow waits only for the remainder
//! - [`WorkflowContext::call_with_retry`]: one recorded effect per attempt
//!   with durable backoff sleeps in between

use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::time::{Clock, Timer};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

// ============================================================================
// Effect Records
// ============================================================================

/// Classification of a recorded effect failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectErrorKind {
    Transient,
    Permanent,
    QuotaExceeded,
}

/// A failure outcome as stored in the effect log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectError {
    pub kind: EffectErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl EffectError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: EffectErrorKind::Transient,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: EffectErrorKind::Permanent,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == EffectErrorKind::Transient
    }
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<BridgeError> for EffectError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::QuotaExceeded(message) => Self {
                kind: EffectErrorKind::QuotaExceeded,
                message,
                details: Vec::new(),
            },
            e if e.is_transient() => Self::transient(e.to_string()),
            e => Self::permanent(e.to_string()),
        }
    }
}

impl From<SyncError> for EffectError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Transient(message) => Self::transient(message),
            SyncError::JobQuotaExceeded(message) => Self {
                kind: EffectErrorKind::QuotaExceeded,
                message,
                details: Vec::new(),
            },
            e => Self::permanent(e.to_string()),
        }
    }
}

impl From<EffectError> for SyncError {
    fn from(error: EffectError) -> Self {
        match error.kind {
            EffectErrorKind::Transient => SyncError::Transient(error.message),
            EffectErrorKind::Permanent => SyncError::Permanent(error.message),
            EffectErrorKind::QuotaExceeded => SyncError::JobQuotaExceeded(error.message),
        }
    }
}

/// Outcome of an effect as seen by the workflow body
pub type EffectResult<T> = std::result::Result<T, EffectError>;

/// Serialized outcome stored with a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RecordedOutcome {
    Ok(serde_json::Value),
    Err(EffectError),
}

/// One entry of a workflow instance's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub sequence: u64,
    pub name: String,
    pub outcome: RecordedOutcome,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Effect Log
// ============================================================================

/// Append-only history store keyed by workflow instance.
#[async_trait]
pub trait EffectLog: Send + Sync {
    /// Load the full history of an instance in sequence order.
    async fn load(&self, instance_id: &str) -> Result<Vec<EffectRecord>>;

    /// Append one record. The sequence must equal the current history length.
    async fn append(&self, instance_id: &str, record: &EffectRecord) -> Result<()>;

    /// Drop the history of a finished instance.
    async fn purge(&self, instance_id: &str) -> Result<()>;
}

/// Process-local [`EffectLog`]
#[derive(Debug, Default)]
pub struct InMemoryEffectLog {
    instances: Mutex<HashMap<String, Vec<EffectRecord>>>,
}

impl InMemoryEffectLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an instance with an existing history.
    pub async fn insert_history(&self, instance_id: &str, records: Vec<EffectRecord>) {
        self.instances
            .lock()
            .await
            .insert(instance_id.to_string(), records);
    }

    pub async fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl EffectLog for InMemoryEffectLog {
    async fn load(&self, instance_id: &str) -> Result<Vec<EffectRecord>> {
        Ok(self
            .instances
            .lock()
            .await
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, instance_id: &str, record: &EffectRecord) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let history = instances.entry(instance_id.to_string()).or_default();
        if record.sequence != history.len() as u64 {
            return Err(SyncError::EffectLog(format!(
                "Out of order append for {}: expected sequence {}, got {}",
                instance_id,
                history.len(),
                record.sequence
            )));
        }
        history.push(record.clone());
        Ok(())
    }

    async fn purge(&self, instance_id: &str) -> Result<()> {
        self.instances.lock().await.remove(instance_id);
        Ok(())
    }
}

// ============================================================================
// Retry outcome
// ============================================================================

/// Why a retried effect gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// A non-retryable failure stopped the loop early.
    Permanent { attempts: u32, error: EffectError },
    /// Attempts or total time ran out while failures were still transient.
    Exhausted { attempts: u32, last_error: EffectError },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> &EffectError {
        match self {
            RetryError::Permanent { error, .. } => error,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

// ============================================================================
// Workflow Context
// ============================================================================

/// Execution context of one workflow instance.
pub struct WorkflowContext {
    instance_id: String,
    history: Vec<EffectRecord>,
    cursor: u64,
    log: Arc<dyn EffectLog>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
}

impl WorkflowContext {
    /// Open an instance, loading whatever history it already has.
    pub async fn load(
        instance_id: impl Into<String>,
        log: Arc<dyn EffectLog>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn Timer>,
    ) -> Result<Self> {
        let instance_id = instance_id.into();
        let history = log.load(&instance_id).await?;
        debug!(
            instance_id = %instance_id,
            recorded_effects = history.len(),
            "Loaded workflow history"
        );

        Ok(Self {
            instance_id,
            history,
            cursor: 0,
            log,
            clock,
            timer,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// True while the body is still consuming recorded outcomes.
    ///
    /// Log lines and events should only be produced when this is false.
    pub fn is_replaying(&self) -> bool {
        (self.cursor as usize) < self.history.len()
    }

    /// Number of effects requested so far in this execution.
    pub fn effects_requested(&self) -> u64 {
        self.cursor
    }

    /// Run `step` exactly once for this position in the history.
    ///
    /// The outer result carries engine failures (log I/O, divergence); the
    /// inner one is the step's own outcome, recorded or freshly produced.
    pub async fn call<T, F, Fut>(&mut self, name: &str, step: F) -> Result<EffectResult<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = EffectResult<T>>,
    {
        let sequence = self.cursor;
        self.cursor += 1;

        if let Some(record) = self.history.get(sequence as usize) {
            if record.name != name {
                return Err(SyncError::NonDeterministic {
                    instance_id: self.instance_id.clone(),
                    sequence,
                    expected: record.name.clone(),
                    found: name.to_string(),
                });
            }
            trace!(instance_id = %self.instance_id, sequence, effect = name, "Replaying effect");
            return match &record.outcome {
                RecordedOutcome::Ok(value) => Ok(Ok(serde_json::from_value(value.clone())?)),
                RecordedOutcome::Err(error) => Ok(Err(error.clone())),
            };
        }

        let outcome = step().await;
        let recorded = match &outcome {
            Ok(value) => RecordedOutcome::Ok(serde_json::to_value(value)?),
            Err(error) => RecordedOutcome::Err(error.clone()),
        };
        let record = EffectRecord {
            sequence,
            name: name.to_string(),
            outcome: recorded,
            recorded_at: self.clock.now(),
        };
        self.log.append(&self.instance_id, &record).await?;
        self.history.push(record);

        Ok(outcome)
    }

    /// Recorded wall-clock time.
    pub async fn now(&mut self) -> Result<DateTime<Utc>> {
        let clock = Arc::clone(&self.clock);
        let now = self
            .call("clock.now", move || async move { Ok(clock.now()) })
            .await??;
        Ok(now)
    }

    /// Durable sleep.
    ///
    /// The fire time is recorded when the timer is scheduled, so a workflow
    /// resumed mid-sleep only waits for the remainder.
    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        let delta = chrono::Duration::from_std(duration)
            .map_err(|e| SyncError::Internal(format!("Invalid timer duration: {}", e)))?;
        let clock = Arc::clone(&self.clock);
        let fire_at: DateTime<Utc> = self
            .call("timer.schedule", move || async move { Ok(clock.now() + delta) })
            .await??;

        let timer = Arc::clone(&self.timer);
        self.call("timer.fire", move || async move {
            timer.sleep_until(fire_at).await;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Run `step` under `policy`, one recorded effect per attempt.
    ///
    /// `step` receives the 1-based attempt number. Transient failures are
    /// retried after a durable sleep; any other failure stops immediately.
    /// Elapsed time is measured against the recorded start of the loop.
    pub async fn call_with_retry<T, F, Fut>(
        &mut self,
        name: &str,
        policy: &RetryPolicy,
        mut step: F,
    ) -> Result<std::result::Result<T, RetryError>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EffectResult<T>>,
    {
        let started = self.now().await?;
        let mut attempt = 1;

        loop {
            let effect_name = format!("{}#{}", name, attempt);
            match self.call(&effect_name, || step(attempt)).await? {
                Ok(value) => return Ok(Ok(value)),
                Err(error) if error.is_retryable() => {
                    let elapsed = (self.now().await? - started)
                        .to_std()
                        .unwrap_or(Duration::ZERO);

                    match policy.next_delay(attempt, elapsed) {
                        Some(delay) => {
                            if !self.is_replaying() {
                                debug!(
                                    instance_id = %self.instance_id,
                                    effect = name,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %error,
                                    "Retrying after transient failure"
                                );
                            }
                            self.sleep(delay).await?;
                            attempt += 1;
                        }
                        None => {
                            return Ok(Err(RetryError::Exhausted {
                                attempts: attempt,
                                last_error: error,
                            }))
                        }
                    }
                }
                Err(error) => {
                    return Ok(Err(RetryError::Permanent {
                        attempts: attempt,
                        error,
                    }))
                }
            }
        }
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.instance_id)
            .field("recorded_effects", &self.history.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}
