//! Timer Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::time::Timer;
use chrono::{DateTime, Utc};

/// Sleeps on the Tokio timer until a wall-clock deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(remaining) = (deadline - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
    }
}
