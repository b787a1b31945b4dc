//! Durable representation of a session
//!
//! Only the lookup hash and the validity window are stored in the clear. All
//! other session fields, secrets included, travel in one encrypted payload.

use crate::encryption::ClusterEncryption;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use wssc_core::{Credentials, ErrorContext, Identity, WsscError, WsscResult};
use wssc_session::{SecretBytes, Session};
use zeroize::Zeroizing;

/// A row of the persistent session table
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PersistentSessionRecord {
    /// base64 SHA-512 lookup key, unique
    pub session_key_hash: String,
    pub created: i64,
    pub expires: i64,
    /// Encrypted session payload
    pub session_data: String,
}

impl PersistentSessionRecord {
    /// Seal `session` under `session_key_hash`
    pub fn seal(
        session: &Session,
        session_key_hash: String,
        encryption: &dyn ClusterEncryption,
    ) -> WsscResult<Self> {
        let payload = SessionPayload {
            identifier: session.identifier().to_string(),
            namespace: session.namespace().map(str::to_string),
            owner: session.owner().clone(),
            credentials: session.credentials().cloned(),
            service_url: session.service_url().map(str::to_string),
            shared_secret: encode_secret(session.shared_secret()),
            client_entropy: session.client_entropy().map(encode_secret),
            server_entropy: session.server_entropy().map(encode_secret),
        };
        let json = Zeroizing::new(serde_json::to_vec(&payload)?);

        Ok(Self {
            session_key_hash,
            created: session.creation(),
            expires: session.expiration(),
            session_data: encryption.encrypt(&json)?,
        })
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires
    }

    /// Decrypt the payload back into a session
    pub fn open(&self, encryption: &dyn ClusterEncryption) -> WsscResult<Session> {
        let json = Zeroizing::new(encryption.decrypt(&self.session_data)?);
        let payload: SessionPayload = serde_json::from_slice(&json)?;

        Session::builder(payload.identifier, decode_secret(&payload.shared_secret)?)
            .namespace(payload.namespace)
            .client_entropy(payload.client_entropy.as_ref().map(|e| decode_secret(e)).transpose()?)
            .server_entropy(payload.server_entropy.as_ref().map(|e| decode_secret(e)).transpose()?)
            .validity(self.created, self.expires)
            .owner(payload.owner)
            .credentials(payload.credentials)
            .service_url(payload.service_url)
            .build()
    }
}

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    identifier: String,
    namespace: Option<String>,
    owner: Identity,
    credentials: Option<Credentials>,
    service_url: Option<String>,
    shared_secret: Zeroizing<String>,
    client_entropy: Option<Zeroizing<String>>,
    server_entropy: Option<Zeroizing<String>>,
}

fn encode_secret(bytes: &[u8]) -> Zeroizing<String> {
    Zeroizing::new(STANDARD.encode(bytes))
}

fn decode_secret(encoded: &str) -> WsscResult<SecretBytes> {
    STANDARD
        .decode(encoded)
        .map(SecretBytes::new)
        .map_err(|e| WsscError::Encryption {
            message: format!("corrupt key material in session payload: {}", e),
            context: ErrorContext::new("session_record").with_operation("open"),
        })
}
