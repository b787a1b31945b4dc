//! Durable storage backends for session records

use crate::record::PersistentSessionRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, error, info};
use wssc_core::{persistence_error, ErrorContext, WsscError, WsscResult};

/// Find, save and bulk-delete over the unique session key hash
#[async_trait]
pub trait SessionRecordStorage: Send + Sync {
    async fn find_by_hash(&self, hash: &str) -> WsscResult<Option<PersistentSessionRecord>>;

    /// Insert a record. A live record with the same hash yields
    /// `DuplicateSession`; one that expired by `now_millis` is replaced.
    async fn save(&self, record: &PersistentSessionRecord, now_millis: i64) -> WsscResult<()>;

    async fn delete_by_hash(&self, hash: &str) -> WsscResult<bool>;

    /// Delete records with `expires < now_millis`
    async fn delete_expired(&self, now_millis: i64) -> WsscResult<u64>;

    async fn delete_all(&self) -> WsscResult<u64>;

    async fn count(&self) -> WsscResult<u64>;
}

fn duplicate(hash: &str, backend: &str) -> WsscError {
    WsscError::DuplicateSession {
        key: hash.to_string(),
        context: ErrorContext::new(backend).with_operation("save"),
    }
}

/// Process-local storage, for single-node deployments and tests
#[derive(Debug, Default)]
pub struct MemoryRecordStorage {
    records: Mutex<HashMap<String, PersistentSessionRecord>>,
}

impl MemoryRecordStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRecordStorage for MemoryRecordStorage {
    async fn find_by_hash(&self, hash: &str) -> WsscResult<Option<PersistentSessionRecord>> {
        Ok(self.records.lock().get(hash).cloned())
    }

    async fn save(&self, record: &PersistentSessionRecord, now_millis: i64) -> WsscResult<()> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&record.session_key_hash) {
            if !existing.is_expired(now_millis) {
                return Err(duplicate(&record.session_key_hash, "memory_record_storage"));
            }
        }
        records.insert(record.session_key_hash.clone(), record.clone());
        Ok(())
    }

    async fn delete_by_hash(&self, hash: &str) -> WsscResult<bool> {
        Ok(self.records.lock().remove(hash).is_some())
    }

    async fn delete_expired(&self, now_millis: i64) -> WsscResult<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| record.expires >= now_millis);
        Ok((before - records.len()) as u64)
    }

    async fn delete_all(&self) -> WsscResult<u64> {
        let mut records = self.records.lock();
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn count(&self) -> WsscResult<u64> {
        Ok(self.records.lock().len() as u64)
    }
}

/// SQLite-backed storage shared by the nodes of a cluster
#[derive(Debug, Clone)]
pub struct SqliteRecordStorage {
    pool: SqlitePool,
}

impl SqliteRecordStorage {
    /// Connect to `database_url`, creating the database file if needed
    pub async fn connect(database_url: &str) -> WsscResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| WsscError::Config {
                message: format!("Invalid database URL '{}': {}", database_url, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("sqlite_record_storage")
                    .with_operation("connect")
                    .with_suggestion("Use a URL like sqlite://wssc-sessions.db"),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| persistence_error!("Failed to open session database", "sqlite_record_storage", e))?;

        Self::new(pool).await
    }

    /// Wrap an existing pool and make sure the table exists
    pub async fn new(pool: SqlitePool) -> WsscResult<Self> {
        let storage = Self { pool };
        storage.create_tables().await?;
        Ok(storage)
    }

    async fn create_tables(&self) -> WsscResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS secure_conversation_sessions (
                session_key_hash TEXT NOT NULL UNIQUE,
                created INTEGER NOT NULL,
                expires INTEGER NOT NULL,
                session_data TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sc_sessions_expires ON secure_conversation_sessions(expires)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await.map_err(|e| {
                error!("Failed to create session table: {}", e);
                persistence_error!("Failed to create session table", "sqlite_record_storage", e)
            })?;
        }

        info!("Session table ready");
        Ok(())
    }
}

#[async_trait]
impl SessionRecordStorage for SqliteRecordStorage {
    async fn find_by_hash(&self, hash: &str) -> WsscResult<Option<PersistentSessionRecord>> {
        sqlx::query_as::<_, PersistentSessionRecord>(
            "SELECT session_key_hash, created, expires, session_data \
             FROM secure_conversation_sessions WHERE session_key_hash = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| persistence_error!("Failed to read session", "sqlite_record_storage", e))
    }

    async fn save(&self, record: &PersistentSessionRecord, now_millis: i64) -> WsscResult<()> {
        // An expired row under the same hash is overwritten in place
        let result = sqlx::query(
            "INSERT INTO secure_conversation_sessions \
             (session_key_hash, created, expires, session_data) VALUES (?, ?, ?, ?) \
             ON CONFLICT(session_key_hash) DO UPDATE SET \
             created = excluded.created, \
             expires = excluded.expires, \
             session_data = excluded.session_data \
             WHERE secure_conversation_sessions.expires <= ?",
        )
        .bind(&record.session_key_hash)
        .bind(record.created)
        .bind(record.expires)
        .bind(&record.session_data)
        .bind(now_millis)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                debug!("Session record stored");
                Ok(())
            }
            Ok(_) => Err(duplicate(&record.session_key_hash, "sqlite_record_storage")),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(duplicate(&record.session_key_hash, "sqlite_record_storage"))
            }
            Err(e) => Err(persistence_error!(
                "Failed to save session",
                "sqlite_record_storage",
                e
            )),
        }
    }

    async fn delete_by_hash(&self, hash: &str) -> WsscResult<bool> {
        let result =
            sqlx::query("DELETE FROM secure_conversation_sessions WHERE session_key_hash = ?")
                .bind(hash)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    persistence_error!("Failed to delete session", "sqlite_record_storage", e)
                })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now_millis: i64) -> WsscResult<u64> {
        let result = sqlx::query("DELETE FROM secure_conversation_sessions WHERE expires < ?")
            .bind(now_millis)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                persistence_error!("Failed to delete expired sessions", "sqlite_record_storage", e)
            })?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> WsscResult<u64> {
        let result = sqlx::query("DELETE FROM secure_conversation_sessions")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                persistence_error!("Failed to delete sessions", "sqlite_record_storage", e)
            })?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> WsscResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM secure_conversation_sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                persistence_error!("Failed to count sessions", "sqlite_record_storage", e)
            })?;
        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }
}
