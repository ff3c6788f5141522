//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::SummaryRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SummaryRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite store and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // serializes writers instead of failing them.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened sqlite summary store");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Distinguish a missing row from one that already left `processing`.
    async fn completion_conflict(&self, summary_id: uuid::Uuid, to: &str) -> MetadataError {
        let current: Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM encounter_summaries WHERE summary_id = ?")
                .bind(summary_id)
                .fetch_optional(&self.pool)
                .await;
        match current {
            Ok(Some(from)) => MetadataError::InvalidStateTransition {
                from,
                to: to.to_string(),
            },
            Ok(None) => MetadataError::NotFound(format!("summary {summary_id}")),
            Err(e) => MetadataError::Database(e),
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::SummaryRow;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Integer sort key for `created_at`; the text column does not order
    /// correctly across differing sub-second precision.
    fn unix_nanos(at: OffsetDateTime) -> MetadataResult<i64> {
        i64::try_from(at.unix_timestamp_nanos())
            .map_err(|_| MetadataError::Internal(format!("timestamp {at} out of range")))
    }

    #[async_trait]
    impl SummaryRepo for SqliteStore {
        async fn create_summary(&self, summary: &SummaryRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO encounter_summaries (
                    summary_id, association_key, zone_id, owner_id, participants,
                    boss_id, duration_ms, status, error_detail, created_at, updated_at,
                    created_at_ns
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(summary.summary_id)
            .bind(&summary.association_key)
            .bind(summary.zone_id)
            .bind(&summary.owner_id)
            .bind(&summary.participants)
            .bind(summary.boss_id)
            .bind(summary.duration_ms)
            .bind(&summary.status)
            .bind(&summary.error_detail)
            .bind(summary.created_at)
            .bind(summary.updated_at)
            .bind(unix_nanos(summary.created_at)?)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                    MetadataError::AlreadyExists(format!("summary {}", summary.summary_id)),
                ),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_summary(&self, summary_id: Uuid) -> MetadataResult<Option<SummaryRow>> {
            let row = sqlx::query_as::<_, SummaryRow>(
                "SELECT * FROM encounter_summaries WHERE summary_id = ?",
            )
            .bind(summary_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn latest_summary_for_association(
            &self,
            association_key: &str,
        ) -> MetadataResult<Option<SummaryRow>> {
            let row = sqlx::query_as::<_, SummaryRow>(
                r#"
                SELECT * FROM encounter_summaries
                WHERE association_key = ?
                ORDER BY created_at_ns DESC, rowid DESC
                LIMIT 1
                "#,
            )
            .bind(association_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn complete_summary_success(
            &self,
            summary_id: Uuid,
            participants_json: &str,
            boss_id: Option<i64>,
            duration_ms: i64,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE encounter_summaries
                SET status = 'success', participants = ?, boss_id = ?, duration_ms = ?,
                    error_detail = NULL, updated_at = ?
                WHERE summary_id = ? AND status = 'processing'
                "#,
            )
            .bind(participants_json)
            .bind(boss_id)
            .bind(duration_ms)
            .bind(updated_at)
            .bind(summary_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.completion_conflict(summary_id, "success").await);
            }
            Ok(())
        }

        async fn complete_summary_failure(
            &self,
            summary_id: Uuid,
            error_detail: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE encounter_summaries
                SET status = 'failed', error_detail = ?, updated_at = ?
                WHERE summary_id = ? AND status = 'processing'
                "#,
            )
            .bind(error_detail)
            .bind(updated_at)
            .bind(summary_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.completion_conflict(summary_id, "failed").await);
            }
            Ok(())
        }

        async fn fail_processing_summaries(
            &self,
            error_detail: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                UPDATE encounter_summaries
                SET status = 'failed', error_detail = ?, updated_at = ?
                WHERE status = 'processing'
                "#,
            )
            .bind(error_detail)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn count_summaries_by_status(&self, status: &str) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM encounter_summaries WHERE status = ?")
                    .bind(status)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count.max(0) as u64)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS encounter_summaries (
    summary_id BLOB PRIMARY KEY,
    association_key TEXT NOT NULL,
    zone_id INTEGER NOT NULL,
    owner_id TEXT NOT NULL,
    participants TEXT,
    boss_id INTEGER,
    duration_ms INTEGER,
    status TEXT NOT NULL CHECK (status IN ('processing', 'success', 'failed')),
    error_detail TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    created_at_ns INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_encounter_summaries_association ON encounter_summaries(association_key, created_at_ns);
CREATE INDEX IF NOT EXISTS idx_encounter_summaries_status ON encounter_summaries(status);
"#;
