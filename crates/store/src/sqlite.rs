//! SQLite coordination store.
//!
//! One database file shared by every process that runs or steers agents:
//! - `confirmations`: pending human decisions for gated tool calls
//! - `stop_flags`: stop requests keyed by request id
//! - `contexts`: the latest JSON snapshot of each conversation's context
//!
//! WAL mode lets a `reagent approve` process write while a running engine
//! polls from another connection.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reagent_core::context::AgentContext;
use reagent_core::error::StoreError;
use reagent_core::message::ConversationId;
use reagent_core::stop::StopSignal;
use reagent_core::store::ContextStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a waiting worker re-reads its confirmation row.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pending confirmations older than this are purged.
const DEFAULT_CONFIRMATION_EXPIRY: Duration = Duration::from_secs(300);

pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
    pub(crate) poll_interval: Duration,
    pub(crate) confirmation_expiry: Duration,
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn timestamp_after(delay: Duration) -> String {
    let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    (Utc::now() + delta).to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database shared by the pool.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Wrap an existing pool and run migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmation_expiry: DEFAULT_CONFIRMATION_EXPIRY,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_confirmation_expiry(mut self, expiry: Duration) -> Self {
        self.confirmation_expiry = expiry;
        self
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS confirmations (
                action_id   TEXT PRIMARY KEY,
                decision    TEXT,
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("confirmations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stop_flags (
                request_id  TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("stop_flags table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contexts (
                conversation_id TEXT PRIMARY KEY,
                snapshot        TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("contexts table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_confirmations_expires ON confirmations(expires_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("expiry index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Drop confirmations nobody decided within the expiry window.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM confirmations WHERE expires_at <= ?1")
            .bind(now_timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Expiry purge failed: {e}")))?;
        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "Expired confirmations removed");
        }
        Ok(purged)
    }
}

#[async_trait]
impl StopSignal for SqliteStore {
    async fn request_stop(&self, request_id: &str) -> bool {
        if request_id.is_empty() {
            warn!("Stop requested without a request id");
            return false;
        }
        let result = sqlx::query(
            "INSERT INTO stop_flags (request_id, created_at) VALUES (?1, ?2)
             ON CONFLICT(request_id) DO NOTHING",
        )
        .bind(request_id)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(request_id, "Stop flag set");
                true
            }
            Err(e) => {
                warn!(request_id, error = %e, "Failed to set stop flag");
                false
            }
        }
    }

    async fn is_stop_requested(&self, request_id: &str) -> bool {
        if request_id.is_empty() {
            return false;
        }
        sqlx::query("SELECT 1 FROM stop_flags WHERE request_id = ?1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.is_some())
            .unwrap_or_else(|e| {
                warn!(request_id, error = %e, "Stop flag lookup failed");
                false
            })
    }

    async fn clear(&self, request_id: &str) {
        if let Err(e) = sqlx::query("DELETE FROM stop_flags WHERE request_id = ?1")
            .bind(request_id)
            .execute(&self.pool)
            .await
        {
            warn!(request_id, error = %e, "Failed to clear stop flag");
        }
    }
}

#[async_trait]
impl ContextStore for SqliteStore {
    async fn save(&self, context: &AgentContext) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(context)
            .map_err(|e| StoreError::Storage(format!("Context serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO contexts (conversation_id, snapshot, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(conversation_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(context.conversation_id.as_str())
        .bind(&snapshot)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Context upsert failed: {e}")))?;

        debug!(conversation_id = %context.conversation_id, "Context saved");
        Ok(())
    }

    async fn load(&self, conversation_id: &ConversationId) -> Result<Option<AgentContext>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM contexts WHERE conversation_id = ?1")
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Context lookup failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let snapshot: String = row
            .try_get("snapshot")
            .map_err(|e| StoreError::Storage(format!("snapshot column: {e}")))?;
        let context = serde_json::from_str(&snapshot)
            .map_err(|e| StoreError::Corrupt(format!("context {conversation_id}: {e}")))?;
        Ok(Some(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::message::Message;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn stop_flag_lifecycle() {
        let store = test_store().await;
        assert!(!store.is_stop_requested("req-1").await);
        assert!(store.request_stop("req-1").await);
        assert!(store.request_stop("req-1").await);
        assert!(store.is_stop_requested("req-1").await);
        store.clear("req-1").await;
        assert!(!store.is_stop_requested("req-1").await);
    }

    #[tokio::test]
    async fn empty_request_id_is_refused() {
        let store = test_store().await;
        assert!(!store.request_stop("").await);
    }

    #[tokio::test]
    async fn context_snapshot_round_trip() {
        let store = test_store().await;
        let mut ctx = AgentContext::new(ConversationId::from("conv-1"), "gpt-4o-mini");
        ctx.add_message(Message::user("What's the weather in Paris?"));
        ctx.bump_iteration();
        store.save(&ctx).await.unwrap();

        ctx.bump_iteration();
        store.save(&ctx).await.unwrap();

        let loaded = store.load(&ConversationId::from("conv-1")).await.unwrap().unwrap();
        assert_eq!(loaded.iterations(), 2);
        assert_eq!(loaded.messages.len(), 1);
        assert!(store.load(&ConversationId::from("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported() {
        let store = test_store().await;
        sqlx::query("INSERT INTO contexts (conversation_id, snapshot, updated_at) VALUES ('bad', '{', 'x')")
            .execute(&store.pool)
            .await
            .unwrap();
        let err = store.load(&ConversationId::from("bad")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn stop_flag_is_visible_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("shared.db").display());
        let engine_side = SqliteStore::new(&path).await.unwrap();
        let cli_side = SqliteStore::new(&path).await.unwrap();

        assert!(cli_side.request_stop("req-9").await);
        assert!(engine_side.is_stop_requested("req-9").await);
    }
}
