//! Seam towards the clustered persistence layer
//!
//! The managers only see this trait; the durable implementation lives in the
//! `wssc-persist` crate. Implementations perform I/O and are always awaited
//! without the in-memory store lock held.

use crate::session::Session;
use async_trait::async_trait;
use wssc_core::{Identity, WsscResult};

#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Whether cluster-wide persistence is currently switched on
    fn is_enabled(&self) -> bool;

    async fn save_inbound(&self, session: &Session) -> WsscResult<()>;

    /// Live inbound session by identifier; expired rows read as absent
    async fn find_inbound(&self, identifier: &str) -> WsscResult<Option<Session>>;

    async fn delete_inbound(&self, identifier: &str) -> WsscResult<bool>;

    /// Persist an outbound session under its owner and service URL
    async fn save_outbound(&self, session: &Session) -> WsscResult<()>;

    async fn find_outbound(
        &self,
        owner: &Identity,
        service_url: &str,
    ) -> WsscResult<Option<Session>>;

    async fn delete_outbound(&self, owner: &Identity, service_url: &str) -> WsscResult<bool>;
}
