//! # Effect History Repository
//!
//! SQLite persistence for workflow effect logs, so that orchestrations
//! survive host restarts.
//!
//! One row per effect, keyed by `(instance_id, sequence)`. The outcome is
//! stored as the JSON serialization of [`RecordedOutcome`].

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{FromRow, SqlitePool};

use crate::error::{Result, SyncError};
use crate::workflow::{EffectLog, EffectRecord, RecordedOutcome};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS workflow_effects (
        instance_id TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        name TEXT NOT NULL,
        outcome TEXT NOT NULL,
        recorded_at INTEGER NOT NULL,
        PRIMARY KEY (instance_id, sequence)
    )
"#;

/// SQLite implementation of [`EffectLog`]
pub struct SqliteEffectLog {
    pool: SqlitePool,
}

impl SqliteEffectLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `workflow_effects` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(())
    }

    /// Distinct instances that still have history, oldest first.
    pub async fn pending_instances(&self) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT instance_id FROM workflow_effects
            GROUP BY instance_id
            ORDER BY MIN(recorded_at), instance_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

/// Database row representation of an effect record
#[derive(Debug, FromRow)]
struct EffectRow {
    sequence: i64,
    name: String,
    outcome: String,
    recorded_at: i64,
}

impl TryFrom<EffectRow> for EffectRecord {
    type Error = SyncError;

    fn try_from(row: EffectRow) -> Result<Self> {
        let outcome: RecordedOutcome = serde_json::from_str(&row.outcome)?;
        let recorded_at = DateTime::from_timestamp_millis(row.recorded_at).ok_or_else(|| {
            SyncError::Database(format!("Invalid recorded_at: {}", row.recorded_at))
        })?;
        let sequence = u64::try_from(row.sequence)
            .map_err(|_| SyncError::Database(format!("Invalid sequence: {}", row.sequence)))?;

        Ok(EffectRecord {
            sequence,
            name: row.name,
            outcome,
            recorded_at,
        })
    }
}

#[async_trait]
impl EffectLog for SqliteEffectLog {
    async fn load(&self, instance_id: &str) -> Result<Vec<EffectRecord>> {
        let rows = sqlx::query_as::<_, EffectRow>(
            r#"
            SELECT sequence, name, outcome, recorded_at
            FROM workflow_effects
            WHERE instance_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let records = rows
            .into_iter()
            .map(EffectRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        if let Some((position, record)) = records
            .iter()
            .enumerate()
            .find(|(position, record)| record.sequence != *position as u64)
        {
            return Err(SyncError::EffectLog(format!(
                "History of {} has a gap at position {} (found sequence {})",
                instance_id, position, record.sequence
            )));
        }

        Ok(records)
    }

    async fn append(&self, instance_id: &str, record: &EffectRecord) -> Result<()> {
        let outcome = serde_json::to_string(&record.outcome)?;
        let sequence = i64::try_from(record.sequence)
            .map_err(|_| SyncError::EffectLog(format!("Sequence overflow: {}", record.sequence)))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_effects (instance_id, sequence, name, outcome, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(instance_id)
        .bind(sequence)
        .bind(&record.name)
        .bind(outcome)
        .bind(record.recorded_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            SyncError::EffectLog(format!(
                "Failed to append effect {} of {}: {}",
                record.sequence, instance_id, e
            ))
        })?;

        Ok(())
    }

    async fn purge(&self, instance_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workflow_effects WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;
        Ok(())
    }
}
