//! LibSQL learning store
//!
//! Local libSQL database holding the learning audit trail and persona
//! checkpoints. Implements both [`LearningLog`] and [`CheckpointStore`], so a
//! single database file can back an engine.

use crate::error::{LearnerError, Result};
use crate::learning::checkpoint::{Checkpoint, CheckpointStore};
use crate::storage::{LearningLog, LearningRecord};
use crate::types::{AdjustmentRecord, FeedbackSign, PersonaVector};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, Builder, Connection, Database, Row, Value};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS learning_records (
        id TEXT PRIMARY KEY,
        response_id TEXT NOT NULL,
        sign TEXT NOT NULL,
        persona_before TEXT NOT NULL,
        adjustments TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_learning_records_created ON learning_records(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS persona_checkpoints (
        id TEXT PRIMARY KEY,
        persona TEXT NOT NULL,
        feedback_count INTEGER NOT NULL,
        validation_score REAL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_persona_checkpoints_recency ON persona_checkpoints(created_at, feedback_count)",
];

const CHECKPOINT_COLUMNS: &str = "id, persona, feedback_count, validation_score, created_at";

/// Fixed-width timestamps so text ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| LearnerError::Database(format!("Invalid timestamp '{}': {}", raw, e)))
}

pub struct LibsqlLearningStore {
    _db: Database,
    conn: Connection,
}

impl LibsqlLearningStore {
    /// Open (or create) a database file and initialize the schema
    pub async fn new_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LearnerError::Database(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LearnerError::Database(format!("Failed to create local database: {}", e)))?;
        info!("Opened learning database at {}", path.display());
        Self::with_database(db).await
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| LearnerError::Database(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_database(db).await
    }

    async fn with_database(db: Database) -> Result<Self> {
        // One connection for the store's lifetime; in-memory databases are per-connection
        let conn = db
            .connect()
            .map_err(|e| LearnerError::Database(format!("Failed to get connection: {}", e)))?;
        let store = Self { _db: db, conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            self.conn.execute(statement, params![]).await.map_err(|e| {
                LearnerError::Database(format!("Failed to initialize schema: {}", e))
            })?;
        }
        debug!("Learning store schema ready");
        Ok(())
    }

    /// Number of audit records stored
    pub async fn count_records(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM learning_records", params![])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Most recent audit records, newest first
    pub async fn recent_records(&self, limit: usize) -> Result<Vec<LearningRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, response_id, sign, persona_before, adjustments, created_at
                 FROM learning_records ORDER BY created_at DESC LIMIT ?",
                params![limit as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }

    fn row_to_record(row: &Row) -> Result<LearningRecord> {
        let sign_raw: String = row.get(2)?;
        let sign: FeedbackSign = sign_raw
            .parse()
            .map_err(|e| LearnerError::Database(format!("Invalid sign '{}': {}", sign_raw, e)))?;
        let persona_before: PersonaVector = serde_json::from_str(&row.get::<String>(3)?)?;
        let adjustments: Vec<AdjustmentRecord> = serde_json::from_str(&row.get::<String>(4)?)?;

        Ok(LearningRecord {
            id: row.get(0)?,
            response_id: row.get(1)?,
            sign,
            persona_before,
            timestamp: parse_timestamp(&row.get::<String>(5)?)?,
            adjustments,
        })
    }

    fn row_to_checkpoint(row: &Row) -> Result<Checkpoint> {
        let persona: PersonaVector = serde_json::from_str(&row.get::<String>(1)?)?;
        let validation_score = match row.get_value(3)? {
            Value::Real(v) => Some(v),
            Value::Integer(v) => Some(v as f64),
            _ => None,
        };

        Ok(Checkpoint {
            id: row.get(0)?,
            persona,
            feedback_count: row.get::<i64>(2)?.max(0) as u64,
            validation_score,
            timestamp: parse_timestamp(&row.get::<String>(4)?)?,
        })
    }
}

#[async_trait]
impl LearningLog for LibsqlLearningStore {
    async fn record(&self, record: &LearningRecord) -> Result<()> {
        let persona_json = serde_json::to_string(&record.persona_before)?;
        let adjustments_json = serde_json::to_string(&record.adjustments)?;

        self.conn
            .execute(
                "INSERT INTO learning_records (id, response_id, sign, persona_before, adjustments, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    record.id.clone(),
                    record.response_id.clone(),
                    record.sign.to_string(),
                    persona_json,
                    adjustments_json,
                    format_timestamp(&record.timestamp)
                ],
            )
            .await?;

        debug!(
            "Recorded learning step {} ({} adjustments)",
            record.id,
            record.adjustments.len()
        );
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for LibsqlLearningStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let persona_json = serde_json::to_string(&checkpoint.persona)?;
        let score = checkpoint
            .validation_score
            .map(Value::Real)
            .unwrap_or(Value::Null);

        self.conn
            .execute(
                "INSERT OR REPLACE INTO persona_checkpoints (id, persona, feedback_count, validation_score, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    checkpoint.id.clone(),
                    persona_json,
                    checkpoint.feedback_count as i64,
                    score,
                    format_timestamp(&checkpoint.timestamp)
                ],
            )
            .await?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM persona_checkpoints ORDER BY created_at DESC, feedback_count DESC, id DESC LIMIT 1",
            CHECKPOINT_COLUMNS
        );
        let mut rows = self.conn.query(&sql, params![]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_checkpoint(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM persona_checkpoints ORDER BY created_at ASC, feedback_count ASC, id ASC",
            CHECKPOINT_COLUMNS
        );
        let mut rows = self.conn.query(&sql, params![]).await?;
        let mut checkpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            checkpoints.push(Self::row_to_checkpoint(&row)?);
        }
        Ok(checkpoints)
    }

    async fn prune(&self, keep: usize) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM persona_checkpoints WHERE id NOT IN (
                    SELECT id FROM persona_checkpoints
                    ORDER BY created_at DESC, feedback_count DESC, id DESC LIMIT ?
                )",
                params![keep as i64],
            )
            .await?;
        if removed > 0 {
            info!("Pruned {} checkpoints, kept {}", removed, keep);
        }
        Ok(removed as usize)
    }
}
