//! WSSC Persist - clustered session persistence
//!
//! Implements [`wssc_session::SessionPersistence`] over hashed lookup keys and
//! an encrypted session payload, with in-memory and SQLite storage backends
//! and a periodic maintenance task.

pub mod encryption;
pub mod hashing;
pub mod record;
pub mod storage;
pub mod store;

pub use encryption::{ClusterEncryption, PassphraseEncryption};
pub use hashing::{inbound_key_hash, outbound_key_hash};
pub use record::PersistentSessionRecord;
pub use storage::{MemoryRecordStorage, SessionRecordStorage, SqliteRecordStorage};
pub use store::PersistentSessionStore;
