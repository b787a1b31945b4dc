//! Two nodes sharing one SQLite session database

use std::sync::Arc;
use std::time::Duration;
use wssc_core::{ClusterConfig, Identity, ManualClock, OsSecureRandom, SessionConfig};
use wssc_persist::{PassphraseEncryption, PersistentSessionStore, SessionRecordStorage, SqliteRecordStorage};
use wssc_session::{
    InboundSessionManager, InboundSessionRequest, OutboundSessionManager, OutboundSessionRequest,
    SessionPersistence, SessionStore,
};

const HOUR: i64 = 3_600_000;

async fn persistent_store(url: &str, clock: Arc<ManualClock>) -> Arc<PersistentSessionStore> {
    let storage = SqliteRecordStorage::connect(url).await.unwrap();
    let encryption = PassphraseEncryption::new("cluster master passphrase").unwrap();
    Arc::new(PersistentSessionStore::new(
        Arc::new(storage),
        Arc::new(encryption),
        clock,
        true,
    ))
}

fn managers(
    clock: Arc<ManualClock>,
    persistence: Arc<PersistentSessionStore>,
) -> (InboundSessionManager, OutboundSessionManager) {
    let config = SessionConfig::default();
    let store = Arc::new(SessionStore::from_config(&config, clock).unwrap());
    let inbound = InboundSessionManager::new(store.clone(), config.clone(), Arc::new(OsSecureRandom))
        .unwrap()
        .with_persistence(persistence.clone());
    let outbound = OutboundSessionManager::new(store, config)
        .unwrap()
        .with_persistence(persistence);
    (inbound, outbound)
}

fn frank() -> Identity {
    Identity::new("ldap", "frank", "frank")
}

#[tokio::test]
async fn test_session_created_on_one_node_is_visible_on_another() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cluster.db").display());
    let clock = Arc::new(ManualClock::new(1_000));

    let (inbound_a, outbound_a) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);
    let (inbound_b, outbound_b) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);

    let issued = inbound_a
        .create_session(InboundSessionRequest::new(frank(), HOUR).with_client_entropy(vec![6u8; 32]))
        .await
        .unwrap();
    let seen = inbound_b.get_session(issued.identifier()).await.unwrap().unwrap();
    assert_eq!(seen.shared_secret(), issued.shared_secret());
    assert_eq!(seen.server_entropy(), issued.server_entropy());

    outbound_a
        .create_session(
            OutboundSessionRequest::new(frank(), "https://partner", "urn:partner:1", HOUR)
                .with_shared_secret(vec![7u8; 24]),
        )
        .await
        .unwrap();
    let remote = outbound_b
        .get_session_for_user(&frank(), "https://partner")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.shared_secret(), &[7u8; 24][..]);

    assert!(inbound_b.cancel_session(issued.identifier()).await.unwrap());
    // Node A still holds its cached copy, but the shared row is gone
    let store_a = persistent_store(&url, clock.clone()).await;
    assert!(store_a.find_inbound(issued.identifier()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_same_identifier_cannot_be_persisted_twice() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cluster.db").display());
    let clock = Arc::new(ManualClock::new(1_000));

    let (_, outbound_a) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);
    let (_, outbound_b) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);

    let request = OutboundSessionRequest::new(frank(), "https://partner", "urn:partner:1", HOUR)
        .with_shared_secret(vec![7u8; 24]);
    outbound_a.create_session(request.clone()).await.unwrap();

    // Node B's cache is empty, so the unique hash in the database decides
    let err = outbound_b.create_session(request).await.unwrap_err();
    assert!(err.is_creation_error());
    assert!(err.is_duplicate());
    assert!(outbound_b.store().is_empty());
}

#[tokio::test]
async fn test_cancel_on_node_without_cached_copy_removes_row() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cluster.db").display());
    let clock = Arc::new(ManualClock::new(1_000));

    let (_, outbound_a) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);
    let (_, outbound_b) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);

    outbound_a
        .create_session(
            OutboundSessionRequest::new(frank(), "https://partner", "urn:partner:1", HOUR)
                .with_shared_secret(vec![7u8; 24]),
        )
        .await
        .unwrap();

    assert!(outbound_b.store().is_empty());
    assert!(outbound_b
        .cancel_session_for_user(&frank(), "https://partner")
        .await
        .unwrap());

    let (_, outbound_c) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);
    assert!(outbound_c
        .get_session_for_user(&frank(), "https://partner")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_expired_session_can_be_renegotiated() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cluster.db").display());
    let clock = Arc::new(ManualClock::new(1_000));

    let (_, outbound) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);
    outbound
        .create_session(
            OutboundSessionRequest::new(frank(), "https://partner", "urn:partner:1", 1_000)
                .with_shared_secret(vec![7u8; 24]),
        )
        .await
        .unwrap();

    clock.advance(1_000);
    assert!(outbound.get_session("frank", "https://partner").unwrap().is_none());
    assert!(outbound
        .get_session_for_user(&frank(), "https://partner")
        .await
        .unwrap()
        .is_none());

    // The stale row is still on disk until maintenance, yet must not block
    let renewed = outbound
        .create_session(
            OutboundSessionRequest::new(frank(), "https://partner", "urn:partner:2", HOUR)
                .with_shared_secret(vec![8u8; 24]),
        )
        .await
        .unwrap();
    assert_eq!(renewed.identifier(), "urn:partner:2");

    let (_, other_node) = managers(clock.clone(), persistent_store(&url, clock.clone()).await);
    let seen = other_node
        .get_session_for_user(&frank(), "https://partner")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.identifier(), "urn:partner:2");
}

#[tokio::test]
async fn test_spawned_maintenance_reaps_expired_rows() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cluster.db").display());
    let clock = Arc::new(ManualClock::new(1_000));

    let persistence = persistent_store(&url, clock.clone()).await;
    let (inbound, _) = managers(clock.clone(), persistence.clone());
    inbound
        .create_session(InboundSessionRequest::new(frank(), 1_000))
        .await
        .unwrap();
    assert_eq!(persistence.storage().count().await.unwrap(), 1);

    clock.set(10_000);
    let config = ClusterConfig {
        cluster_sessions_enabled: true,
        maintenance_interval_ms: 20,
        ..ClusterConfig::default()
    };
    let handle = Arc::clone(&persistence).spawn_maintenance(config.maintenance_interval());

    let mut remaining = 1;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = persistence.storage().count().await.unwrap();
        if remaining == 0 {
            break;
        }
    }
    assert_eq!(remaining, 0);
    handle.abort();
}
