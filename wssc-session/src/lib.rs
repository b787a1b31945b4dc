//! WSSC Session - in-memory secure conversation sessions
//!
//! A shared [`SessionStore`] holds live sessions for two managers:
//! [`InboundSessionManager`] mints identifiers and secrets for sessions this
//! node issues, [`OutboundSessionManager`] tracks sessions established with
//! remote services. Both can write through to a [`SessionPersistence`]
//! implementation for clustered deployments.

pub mod deriver;
pub mod inbound;
pub mod outbound;
pub mod persistence;
pub mod session;
pub mod store;

pub use deriver::{derive_key, PrfAlgorithm, SessionKeyDeriver};
pub use inbound::{InboundSessionManager, InboundSessionRequest};
pub use outbound::{OutboundSessionManager, OutboundSessionRequest};
pub use persistence::SessionPersistence;
pub use session::{SecretBytes, Session, SessionBuilder};
pub use store::{SessionKey, SessionStore};
