//! Persistent Session Store - clustered durability layer
//!
//! Sessions are stored under a one-way hash of their lookup key with the
//! session payload encrypted under the cluster key. A maintenance task reaps
//! expired rows, or every row once cluster sessions have been switched off.

use crate::encryption::{ClusterEncryption, PassphraseEncryption};
use crate::hashing::{inbound_key_hash, outbound_key_hash};
use crate::record::PersistentSessionRecord;
use crate::storage::{SessionRecordStorage, SqliteRecordStorage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wssc_core::{
    lookup_error, persistence_error, Clock, ClusterConfig, Identity, WsscResult,
};
use wssc_session::{Session, SessionPersistence};

const COMPONENT: &str = "persistent_session_store";

pub struct PersistentSessionStore {
    storage: Arc<dyn SessionRecordStorage>,
    encryption: Arc<dyn ClusterEncryption>,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
}

impl PersistentSessionStore {
    pub fn new(
        storage: Arc<dyn SessionRecordStorage>,
        encryption: Arc<dyn ClusterEncryption>,
        clock: Arc<dyn Clock>,
        cluster_sessions_enabled: bool,
    ) -> Self {
        Self {
            storage,
            encryption,
            clock,
            enabled: AtomicBool::new(cluster_sessions_enabled),
        }
    }

    /// SQLite storage at `database_url`, keyed by the passphrase in the
    /// configured environment variable
    pub async fn from_config(config: &ClusterConfig, clock: Arc<dyn Clock>) -> WsscResult<Self> {
        let encryption = PassphraseEncryption::from_env(&config.master_passphrase_env)?;
        let storage = SqliteRecordStorage::connect(&config.database_url).await?;
        Ok(Self::new(
            Arc::new(storage),
            Arc::new(encryption),
            clock,
            config.cluster_sessions_enabled,
        ))
    }

    /// Switch cluster sessions on or off; the next maintenance run wipes the
    /// table when off
    pub fn set_cluster_sessions_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Cluster session persistence toggled");
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionRecordStorage> {
        &self.storage
    }

    /// Delete expired rows, or all rows when cluster sessions are disabled.
    /// Returns the number of deleted rows.
    pub async fn run_maintenance(&self) -> WsscResult<u64> {
        let deleted = if self.is_enabled() {
            let now = self.clock.now_millis();
            self.storage.delete_expired(now).await?
        } else {
            self.storage.delete_all().await?
        };

        if deleted > 0 {
            info!(deleted, enabled = self.is_enabled(), "Removed stale persistent sessions");
        } else {
            debug!("No stale persistent sessions");
        }
        Ok(deleted)
    }

    /// Run maintenance every `interval`. Failures are logged and the next
    /// tick runs as scheduled.
    pub fn spawn_maintenance(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_maintenance().await {
                    e.log();
                }
            }
        })
    }

    async fn save(&self, session: &Session, hash: String) -> WsscResult<()> {
        let record = PersistentSessionRecord::seal(session, hash, self.encryption.as_ref())?;
        self.storage.save(&record, self.clock.now_millis()).await
    }

    async fn find(&self, hash: &str) -> WsscResult<Option<Session>> {
        let Some(record) = self.storage.find_by_hash(hash).await? else {
            return Ok(None);
        };

        if record.is_expired(self.clock.now_millis()) {
            return Ok(None);
        }

        record
            .open(self.encryption.as_ref())
            .map(Some)
            .map_err(|e| lookup_error!("Failed to decrypt persisted session", COMPONENT, e))
    }
}

#[async_trait]
impl SessionPersistence for PersistentSessionStore {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn save_inbound(&self, session: &Session) -> WsscResult<()> {
        self.save(session, inbound_key_hash(session.identifier())).await
    }

    async fn find_inbound(&self, identifier: &str) -> WsscResult<Option<Session>> {
        self.find(&inbound_key_hash(identifier)).await
    }

    async fn delete_inbound(&self, identifier: &str) -> WsscResult<bool> {
        self.storage
            .delete_by_hash(&inbound_key_hash(identifier))
            .await
    }

    async fn save_outbound(&self, session: &Session) -> WsscResult<()> {
        let Some(service_url) = session.service_url() else {
            return Err(persistence_error!(
                "outbound session has no service URL",
                COMPONENT
            ));
        };
        self.save(session, outbound_key_hash(session.owner(), service_url))
            .await
    }

    async fn find_outbound(
        &self,
        owner: &Identity,
        service_url: &str,
    ) -> WsscResult<Option<Session>> {
        self.find(&outbound_key_hash(owner, service_url)).await
    }

    async fn delete_outbound(&self, owner: &Identity, service_url: &str) -> WsscResult<bool> {
        self.storage
            .delete_by_hash(&outbound_key_hash(owner, service_url))
            .await
    }
}

impl std::fmt::Debug for PersistentSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentSessionStore")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStorage;
    use wssc_core::{ManualClock, WsscError};
    use wssc_session::SecretBytes;

    fn store(clock: Arc<ManualClock>, enabled: bool) -> (Arc<MemoryRecordStorage>, PersistentSessionStore) {
        let storage = Arc::new(MemoryRecordStorage::new());
        let encryption = Arc::new(PassphraseEncryption::new("cluster").unwrap());
        let store = PersistentSessionStore::new(storage.clone(), encryption, clock, enabled);
        (storage, store)
    }

    fn session(identifier: &str, expiration: i64) -> Session {
        Session::builder(identifier, SecretBytes::new(vec![8u8; 32]))
            .validity(0, expiration)
            .owner(Identity::new("ldap", "9", "erin"))
            .service_url(Some("https://svc".into()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_inbound_round_trip() {
        let clock = Arc::new(ManualClock::new(10));
        let (storage, store) = store(clock, true);

        store.save_inbound(&session("urn:uuid:1", 100)).await.unwrap();
        let row = storage
            .find_by_hash(&inbound_key_hash("urn:uuid:1"))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(row.session_key_hash, "urn:uuid:1");

        let found = store.find_inbound("urn:uuid:1").await.unwrap().unwrap();
        assert_eq!(found.shared_secret(), &[8u8; 32][..]);

        let err = store.save_inbound(&session("urn:uuid:1", 100)).await.unwrap_err();
        assert!(err.is_duplicate());

        assert!(store.delete_inbound("urn:uuid:1").await.unwrap());
        assert!(store.find_inbound("urn:uuid:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_outbound_keyed_by_full_identity() {
        let clock = Arc::new(ManualClock::new(10));
        let (_, store) = store(clock, true);

        store.save_outbound(&session("remote", 100)).await.unwrap();
        let owner = Identity::new("ldap", "9", "erin");
        assert!(store.find_outbound(&owner, "https://svc").await.unwrap().is_some());

        let other_provider = Identity::new("internal", "9", "erin");
        assert!(store
            .find_outbound(&other_provider, "https://svc")
            .await
            .unwrap()
            .is_none());

        assert!(store.delete_outbound(&owner, "https://svc").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_rows_read_as_absent() {
        let clock = Arc::new(ManualClock::new(10));
        let (_, store) = store(clock.clone(), true);

        store.save_inbound(&session("old", 50)).await.unwrap();
        clock.set(50);
        assert!(store.find_inbound("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_row_does_not_block_renewal() {
        let clock = Arc::new(ManualClock::new(10));
        let (storage, store) = store(clock.clone(), true);

        store.save_outbound(&session("remote-1", 1_010)).await.unwrap();
        clock.advance(1_000);
        let owner = Identity::new("ldap", "9", "erin");
        assert!(store.find_outbound(&owner, "https://svc").await.unwrap().is_none());

        let renewed = Session::builder("remote-2", SecretBytes::new(vec![9u8; 32]))
            .validity(1_010, 5_000)
            .owner(owner.clone())
            .service_url(Some("https://svc".into()))
            .build()
            .unwrap();
        store.save_outbound(&renewed).await.unwrap();

        let found = store.find_outbound(&owner, "https://svc").await.unwrap().unwrap();
        assert_eq!(found.identifier(), "remote-2");
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_policy_follows_flag() {
        let clock = Arc::new(ManualClock::new(10));
        let (storage, store) = store(clock.clone(), true);

        store.save_inbound(&session("expired", 20)).await.unwrap();
        store.save_inbound(&session("live", 1_000)).await.unwrap();

        clock.set(500);
        assert_eq!(store.run_maintenance().await.unwrap(), 1);
        assert_eq!(storage.count().await.unwrap(), 1);

        store.set_cluster_sessions_enabled(false);
        assert!(!store.is_enabled());
        assert_eq!(store.run_maintenance().await.unwrap(), 1);
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecryptable_row_is_lookup_error() {
        let clock = Arc::new(ManualClock::new(10));
        let (storage, store) = store(clock, true);

        let record = PersistentSessionRecord {
            session_key_hash: inbound_key_hash("broken"),
            created: 0,
            expires: 100,
            session_data: "AAAA".to_string(),
        };
        storage.save(&record, 10).await.unwrap();

        let err = store.find_inbound("broken").await.unwrap_err();
        assert!(matches!(err, WsscError::SessionLookup { .. }));
    }
}
