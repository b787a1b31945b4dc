//! Session Store - shared in-memory cache of live sessions
//!
//! Reads share a reader/writer lock; inserts, removals and sweeps are
//! exclusive. Expired entries are evicted lazily when read and in bulk by a
//! sweep that runs at most once per configured interval.

use crate::session::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;
use wssc_core::{Clock, ErrorContext, SessionConfig, WsscError, WsscResult};

/// Lookup key of a stored session.
///
/// Structural rather than concatenated, so `("ab", "c")` and `("a", "bc")`
/// never collide and inbound and outbound entries can share one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionKey {
    /// Inbound sessions, keyed by the identifier this node issued
    Identifier(String),
    /// Outbound sessions, keyed by local user and remote service
    UserService { user_id: String, service_url: String },
}

impl SessionKey {
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self::Identifier(identifier.into())
    }

    pub fn user_service(user_id: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self::UserService {
            user_id: user_id.into(),
            service_url: service_url.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Identifier(id) => write!(f, "{}", id),
            SessionKey::UserService {
                user_id,
                service_url,
            } => write!(f, "user '{}' at '{}'", user_id, service_url),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<SessionKey, Arc<Session>>,
    /// identifier -> composite keys of sessions carrying it
    by_identifier: HashMap<String, Vec<SessionKey>>,
}

impl StoreInner {
    fn insert(&mut self, key: SessionKey, session: Arc<Session>) {
        if matches!(key, SessionKey::UserService { .. }) {
            self.by_identifier
                .entry(session.identifier().to_string())
                .or_default()
                .push(key.clone());
        }
        self.sessions.insert(key, session);
    }

    fn remove(&mut self, key: &SessionKey) -> Option<Arc<Session>> {
        let session = self.sessions.remove(key)?;
        if matches!(key, SessionKey::UserService { .. }) {
            if let Some(keys) = self.by_identifier.get_mut(session.identifier()) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    self.by_identifier.remove(session.identifier());
                }
            }
        }
        Some(session)
    }

    fn composite_keys(&self, identifier: &str) -> Vec<SessionKey> {
        self.by_identifier
            .get(identifier)
            .cloned()
            .unwrap_or_default()
    }
}

/// Thread-safe session cache shared by the inbound and outbound managers
pub struct SessionStore {
    inner: RwLock<StoreInner>,
    clock: Arc<dyn Clock>,
    sweep_interval_ms: i64,
    last_sweep: AtomicI64,
}

impl SessionStore {
    /// Create a store sweeping at most every `sweep_interval_ms`.
    ///
    /// The interval must be positive, or entries that are never read again
    /// would never be freed.
    pub fn new(clock: Arc<dyn Clock>, sweep_interval_ms: i64) -> WsscResult<Self> {
        if sweep_interval_ms <= 0 {
            return Err(WsscError::Config {
                message: format!(
                    "sweep interval must be greater than 0, got {}",
                    sweep_interval_ms
                ),
                source: None,
                context: ErrorContext::new("session_store")
                    .with_operation("new")
                    .with_suggestion("Set session.sweep_interval_ms to a positive value"),
            });
        }

        let now = clock.now_millis();
        Ok(Self {
            inner: RwLock::new(StoreInner::default()),
            clock,
            sweep_interval_ms,
            last_sweep: AtomicI64::new(now),
        })
    }

    pub fn from_config(config: &SessionConfig, clock: Arc<dyn Clock>) -> WsscResult<Self> {
        Self::new(clock, config.sweep_interval_ms)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Insert a session; fails if the key is already present, even when the
    /// present entry has expired but has not been removed yet
    pub fn save(&self, key: SessionKey, session: Arc<Session>) -> WsscResult<()> {
        self.maybe_sweep();

        let mut inner = self.inner.write();
        if inner.sessions.contains_key(&key) {
            return Err(WsscError::DuplicateSession {
                key: key.to_string(),
                context: ErrorContext::new("session_store").with_operation("save"),
            });
        }

        debug!(key = %key, identifier = session.identifier(), "Stored session");
        inner.insert(key, session);
        Ok(())
    }

    /// Return the live session for `key`, evicting it if it has expired
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.maybe_sweep();
        let now = self.clock.now_millis();

        {
            let inner = self.inner.read();
            match inner.sessions.get(key) {
                None => return None,
                Some(session) if !session.is_expired(now) => return Some(Arc::clone(session)),
                Some(_) => {}
            }
        }

        // Re-check under the write lock; the entry may have been replaced
        let mut inner = self.inner.write();
        if inner
            .sessions
            .get(key)
            .is_some_and(|session| session.is_expired(now))
        {
            inner.remove(key);
            debug!(key = %key, "Evicted expired session on read");
        }
        None
    }

    /// Remove unconditionally; returns whether an entry was present
    pub fn remove(&self, key: &SessionKey) -> bool {
        self.take(key).is_some()
    }

    /// Remove unconditionally, handing back the removed session
    pub fn take(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.inner.write().remove(key)
    }

    /// Find a live outbound session by its protocol identifier.
    ///
    /// Goes through the identifier index; expired matches are removed by
    /// their composite key.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<(SessionKey, Arc<Session>)> {
        self.maybe_sweep();
        let now = self.clock.now_millis();

        let expired: Vec<SessionKey> = {
            let inner = self.inner.read();
            let keys = inner.composite_keys(identifier);
            let mut expired = Vec::new();
            for key in keys {
                match inner.sessions.get(&key) {
                    Some(session) if !session.is_expired(now) => {
                        return Some((key, Arc::clone(session)));
                    }
                    Some(_) => expired.push(key),
                    None => {}
                }
            }
            expired
        };

        if !expired.is_empty() {
            let mut inner = self.inner.write();
            for key in &expired {
                if inner
                    .sessions
                    .get(key)
                    .is_some_and(|session| session.is_expired(now))
                {
                    inner.remove(key);
                    debug!(key = %key, identifier, "Evicted expired session on identifier lookup");
                }
            }
        }
        None
    }

    /// Remove an outbound session by its protocol identifier
    pub fn remove_by_identifier(&self, identifier: &str) -> Option<(SessionKey, Arc<Session>)> {
        let mut inner = self.inner.write();
        let key = inner.composite_keys(identifier).into_iter().next()?;
        let session = inner.remove(&key)?;
        Some((key, session))
    }

    /// Remove every session with `expiration <= now`; returns how many went
    pub fn sweep(&self, now_millis: i64) -> usize {
        self.last_sweep.fetch_max(now_millis, Ordering::SeqCst);

        let mut inner = self.inner.write();
        let expired: Vec<SessionKey> = inner
            .sessions
            .iter()
            .filter(|(_, session)| session.is_expired(now_millis))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), remaining = inner.sessions.len(), "Swept expired sessions");
        }
        expired.len()
    }

    /// Sweep if the interval has elapsed since the last sweep.
    ///
    /// Only the caller that wins the timestamp swap performs the sweep.
    fn maybe_sweep(&self) {
        let now = self.clock.now_millis();
        let last = self.last_sweep.load(Ordering::SeqCst);
        if now - last < self.sweep_interval_ms {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.sweep(now);
        }
    }

    /// Live sessions owned by `user_id`, inbound and outbound
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Arc<Session>> {
        let now = self.clock.now_millis();
        self.inner
            .read()
            .sessions
            .values()
            .filter(|session| session.owner().user_id == user_id && !session.is_expired(now))
            .cloned()
            .collect()
    }

    /// Number of stored entries, expired ones included until removed
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.sessions.clear();
        inner.by_identifier.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SecretBytes;
    use wssc_core::{Identity, ManualClock};

    const INTERVAL: i64 = 5 * 60 * 1000;

    fn session(identifier: &str, creation: i64, expiration: i64) -> Arc<Session> {
        Arc::new(
            Session::builder(identifier, SecretBytes::new(vec![9; 32]))
                .validity(creation, expiration)
                .owner(Identity::new("internal", "1", "alice"))
                .build()
                .unwrap(),
        )
    }

    fn store_at(now: i64) -> (Arc<ManualClock>, SessionStore) {
        let clock = Arc::new(ManualClock::new(now));
        let store = SessionStore::new(clock.clone(), INTERVAL).unwrap();
        (clock, store)
    }

    #[test]
    fn test_zero_interval_rejected() {
        let clock = Arc::new(ManualClock::new(0));
        assert!(SessionStore::new(clock, 0).is_err());
    }

    #[test]
    fn test_save_then_get() {
        let (_, store) = store_at(1_000);
        let key = SessionKey::identifier("urn:uuid:1");
        store.save(key.clone(), session("urn:uuid:1", 1_000, 2_000)).unwrap();

        let found = store.get(&key).unwrap();
        assert_eq!(found.identifier(), "urn:uuid:1");
        assert_eq!(found.shared_secret(), &[9; 32][..]);
    }

    #[test]
    fn test_duplicate_rejected_even_when_expired() {
        let (clock, store) = store_at(1_000);
        let key = SessionKey::identifier("urn:uuid:1");
        store.save(key.clone(), session("urn:uuid:1", 1_000, 2_000)).unwrap();

        clock.set(3_000);
        let err = store
            .save(key.clone(), session("urn:uuid:1", 3_000, 4_000))
            .unwrap_err();
        assert!(matches!(err, WsscError::DuplicateSession { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_entry_evicted_on_read() {
        let (clock, store) = store_at(1_000);
        let key = SessionKey::identifier("urn:uuid:1");
        store.save(key.clone(), session("urn:uuid:1", 1_000, 2_000)).unwrap();

        clock.set(2_000);
        assert!(store.get(&key).is_none());
        assert_eq!(store.len(), 0);

        // Once removed, the key can be reused
        store.save(key.clone(), session("urn:uuid:1", 2_000, 3_000)).unwrap();
        assert!(store.get(&key).is_some());
    }

    #[test]
    fn test_remove_reports_presence() {
        let (_, store) = store_at(0);
        let key = SessionKey::identifier("a");
        store.save(key.clone(), session("a", 0, 10)).unwrap();
        assert!(store.remove(&key));
        assert!(!store.remove(&key));
    }

    #[test]
    fn test_sweep_removes_all_expired() {
        let (_, store) = store_at(10_000);
        for i in 0..50 {
            let id = format!("urn:uuid:{}", i);
            store
                .save(SessionKey::identifier(&id), session(&id, 0, 9_999))
                .unwrap();
        }
        store
            .save(SessionKey::identifier("live"), session("live", 0, 20_000))
            .unwrap();

        assert_eq!(store.sweep(10_000), 50);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sweep_runs_automatically_after_interval() {
        let (clock, store) = store_at(0);
        store
            .save(SessionKey::identifier("old"), session("old", 0, 1_000))
            .unwrap();

        // Within the interval the expired entry lingers
        clock.set(INTERVAL - 1);
        store
            .save(SessionKey::identifier("a"), session("a", 0, INTERVAL * 10))
            .unwrap();
        assert_eq!(store.len(), 2);

        clock.set(INTERVAL);
        store
            .save(SessionKey::identifier("b"), session("b", 0, INTERVAL * 10))
            .unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&SessionKey::identifier("old")).is_none());
    }

    #[test]
    fn test_explicit_sweep_with_older_time_keeps_throttle() {
        let (clock, store) = store_at(0);
        store.sweep(INTERVAL);
        store.sweep(0);

        clock.set(2 * INTERVAL - 1);
        store
            .save(SessionKey::identifier("old"), session("old", 0, 1_000))
            .unwrap();
        store
            .save(SessionKey::identifier("a"), session("a", 0, INTERVAL * 10))
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_composite_keys_do_not_collide() {
        let (_, store) = store_at(0);
        store
            .save(SessionKey::user_service("ab", "c"), session("x", 0, 10))
            .unwrap();
        store
            .save(SessionKey::user_service("a", "bc"), session("y", 0, 10))
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_identifier_index() {
        let (clock, store) = store_at(0);
        let key = SessionKey::user_service("1", "https://svc/a");
        store.save(key.clone(), session("remote-1", 0, 100)).unwrap();

        let (found_key, found) = store.find_by_identifier("remote-1").unwrap();
        assert_eq!(found_key, key);
        assert_eq!(found.identifier(), "remote-1");

        // Inbound keys are not part of the outbound index
        store
            .save(SessionKey::identifier("remote-2"), session("remote-2", 0, 100))
            .unwrap();
        assert!(store.find_by_identifier("remote-2").is_none());

        clock.set(100);
        assert!(store.find_by_identifier("remote-1").is_none());
        assert!(store.take(&key).is_none());
    }

    #[test]
    fn test_remove_by_identifier_clears_composite_entry() {
        let (_, store) = store_at(0);
        let key = SessionKey::user_service("1", "https://svc/a");
        store.save(key.clone(), session("remote-1", 0, 100)).unwrap();

        let (removed_key, _) = store.remove_by_identifier("remote-1").unwrap();
        assert_eq!(removed_key, key);
        assert!(store.get(&key).is_none());
        assert!(store.remove_by_identifier("remote-1").is_none());
    }

    #[test]
    fn test_concurrent_saves_have_one_winner() {
        let (_, store) = store_at(0);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .save(SessionKey::identifier("contested"), session("contested", 0, 100))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sessions_for_user() {
        let (_, store) = store_at(0);
        store.save(SessionKey::identifier("a"), session("a", 0, 10)).unwrap();
        store
            .save(SessionKey::user_service("1", "u"), session("b", 0, 10))
            .unwrap();
        assert_eq!(store.sessions_for_user("1").len(), 2);
        assert!(store.sessions_for_user("2").is_empty());

        store.clear();
        assert!(store.is_empty());
    }
}
