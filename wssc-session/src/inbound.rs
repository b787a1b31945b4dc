//! Inbound Session Manager - issuer-side sessions
//!
//! This node mints the session identifier and the shared secret, either from
//! the requester's entropy through the key deriver or directly from the
//! random source.

use crate::deriver::SessionKeyDeriver;
use crate::persistence::SessionPersistence;
use crate::session::{SecretBytes, Session};
use crate::store::{SessionKey, SessionStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wssc_core::{
    creation_error, lookup_error, Credentials, ErrorContext, Identity, SecureRandom, SessionConfig,
    WsscError, WsscResult,
};

const COMPONENT: &str = "inbound_session_manager";

/// Parameters of a session negotiated by a remote requester
#[derive(Debug, Clone)]
pub struct InboundSessionRequest {
    pub owner: Identity,
    pub credentials: Option<Credentials>,
    /// Secure conversation namespace the request arrived in
    pub namespace: Option<String>,
    pub duration_ms: i64,
    pub client_entropy: Option<SecretBytes>,
    /// Requested key length in bits; zero or negative selects the default
    pub requested_key_size_bits: i64,
}

impl InboundSessionRequest {
    pub fn new(owner: Identity, duration_ms: i64) -> Self {
        Self {
            owner,
            credentials: None,
            namespace: None,
            duration_ms,
            client_entropy: None,
            requested_key_size_bits: 0,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_client_entropy(mut self, entropy: impl Into<SecretBytes>) -> Self {
        self.client_entropy = Some(entropy.into());
        self
    }

    pub fn with_key_size_bits(mut self, bits: i64) -> Self {
        self.requested_key_size_bits = bits;
        self
    }
}

/// Creates, looks up and cancels sessions this node issued
pub struct InboundSessionManager {
    store: Arc<SessionStore>,
    config: SessionConfig,
    random: Arc<dyn SecureRandom>,
    deriver: SessionKeyDeriver,
    persistence: Option<Arc<dyn SessionPersistence>>,
}

impl InboundSessionManager {
    /// Create a manager over a shared store; the configuration is validated
    pub fn new(
        store: Arc<SessionStore>,
        config: SessionConfig,
        random: Arc<dyn SecureRandom>,
    ) -> WsscResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            random,
            deriver: SessionKeyDeriver::default(),
            persistence: None,
        })
    }

    pub fn with_deriver(mut self, deriver: SessionKeyDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    /// Write sessions through to, and read misses from, a persistent layer
    pub fn with_persistence(mut self, persistence: Arc<dyn SessionPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Key length in bytes for a request.
    ///
    /// A positive bit count is rounded up to whole bytes and clamped into the
    /// configured range; otherwise the namespace or global default applies.
    pub fn effective_key_size(&self, namespace: Option<&str>, requested_bits: i64) -> usize {
        let (min, max) = (self.config.min_key_size, self.config.max_key_size);
        if requested_bits > 0 {
            let bytes = (requested_bits as u64).div_ceil(8).min(max as u64) as usize;
            bytes.max(min)
        } else {
            self.config.default_key_size_for(namespace).min(max).max(min)
        }
    }

    pub async fn create_session(&self, request: InboundSessionRequest) -> WsscResult<Arc<Session>> {
        if request.duration_ms <= 0 {
            return Err(invalid_duration(request.duration_ms, "create_session"));
        }

        let key_size =
            self.effective_key_size(request.namespace.as_deref(), request.requested_key_size_bits);

        let entropy_range = self.config.min_client_entropy..=self.config.max_client_entropy;
        let (client_entropy, server_entropy, shared_secret) = match request.client_entropy {
            Some(client) if entropy_range.contains(&client.len()) => {
                let server = SecretBytes::new(self.random.random_bytes(key_size));
                let secret = self
                    .deriver
                    .derive(client.as_bytes(), server.as_bytes(), key_size)
                    .map_err(|e| creation_error!("failed to derive shared secret", COMPONENT, e))?;
                (Some(client), Some(server), secret)
            }
            other => {
                if let Some(client) = other {
                    debug!(
                        entropy_len = client.len(),
                        "Client entropy outside accepted range, issuing a random secret"
                    );
                }
                (None, None, SecretBytes::new(self.random.random_bytes(key_size)))
            }
        };

        let now = self.store.clock().now_millis();
        let expiration = now
            .checked_add(request.duration_ms)
            .ok_or_else(|| invalid_duration(request.duration_ms, "create_session"))?;

        let identifier = self.new_identifier();
        let session = Session::builder(identifier, shared_secret)
            .namespace(request.namespace)
            .client_entropy(client_entropy)
            .server_entropy(server_entropy)
            .validity(now, expiration)
            .owner(request.owner)
            .credentials(request.credentials)
            .build()?;

        let session = self.register(session).await?;
        info!(
            identifier = session.identifier(),
            user_id = %session.owner().user_id,
            key_size,
            derived = session.server_entropy().is_some(),
            "Created inbound session"
        );
        Ok(session)
    }

    /// Register a session whose identifier and secret were provisioned
    /// elsewhere, valid from now until `expiration`
    pub async fn import_session(
        &self,
        identifier: &str,
        namespace: Option<String>,
        expiration: i64,
        owner: Identity,
        shared_secret: SecretBytes,
    ) -> WsscResult<Arc<Session>> {
        let secret_range = self.config.min_shared_secret..=self.config.max_shared_secret;
        if !secret_range.contains(&shared_secret.len()) {
            return Err(creation_error!(
                format!(
                    "shared secret of {} bytes is outside [{}, {}]",
                    shared_secret.len(),
                    self.config.min_shared_secret,
                    self.config.max_shared_secret
                ),
                COMPONENT
            ));
        }

        let now = self.store.clock().now_millis();
        if expiration <= now {
            return Err(invalid_duration(
                expiration.saturating_sub(now),
                "import_session",
            ));
        }

        let session = Session::builder(identifier, shared_secret)
            .namespace(namespace)
            .validity(now, expiration)
            .owner(owner)
            .build()?;

        let session = self.register(session).await?;
        info!(identifier, "Imported inbound session");
        Ok(session)
    }

    /// Live session for `identifier`, consulting the persistent layer on a miss
    pub async fn get_session(&self, identifier: &str) -> WsscResult<Option<Arc<Session>>> {
        let key = SessionKey::identifier(identifier);
        if let Some(session) = self.store.get(&key) {
            return Ok(Some(session));
        }

        let Some(persistence) = self.active_persistence() else {
            return Ok(None);
        };

        let found = persistence
            .find_inbound(identifier)
            .await
            .map_err(|e| lookup_error!("failed to read persisted session", COMPONENT, e))?;

        let now = self.store.clock().now_millis();
        match found {
            Some(session) if !session.is_expired(now) => {
                let session = Arc::new(session);
                match self.store.save(key.clone(), Arc::clone(&session)) {
                    Ok(()) => {
                        debug!(identifier, "Loaded inbound session from persistent store");
                        Ok(Some(session))
                    }
                    // Another caller cached it first
                    Err(e) if e.is_duplicate() => Ok(self.store.get(&key)),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(None),
        }
    }

    /// Remove the session from memory and from the persistent layer
    pub async fn cancel_session(&self, identifier: &str) -> WsscResult<bool> {
        let removed = self.store.remove(&SessionKey::identifier(identifier));

        let deleted = match self.active_persistence() {
            Some(persistence) => persistence.delete_inbound(identifier).await?,
            None => false,
        };

        if removed || deleted {
            info!(identifier, "Cancelled inbound session");
        }
        Ok(removed || deleted)
    }

    async fn register(&self, session: Session) -> WsscResult<Arc<Session>> {
        let key = SessionKey::identifier(session.identifier());
        let session = Arc::new(session);

        if let Err(e) = self.store.save(key.clone(), Arc::clone(&session)) {
            warn!(identifier = session.identifier(), error = %e, "Rejected inbound session");
            return Err(e);
        }

        if let Some(persistence) = self.active_persistence() {
            if let Err(e) = persistence.save_inbound(&session).await {
                self.store.remove(&key);
                return Err(creation_error!(
                    "failed to persist session",
                    COMPONENT,
                    e
                ));
            }
        }

        Ok(session)
    }

    fn active_persistence(&self) -> Option<&Arc<dyn SessionPersistence>> {
        self.persistence.as_ref().filter(|p| p.is_enabled())
    }

    /// `urn:uuid:` followed by a random (version 4) UUID
    fn new_identifier(&self) -> String {
        let mut bytes = [0u8; 16];
        self.random.fill_bytes(&mut bytes);
        let uuid = uuid::Builder::from_random_bytes(bytes).into_uuid();
        format!("urn:uuid:{}", uuid)
    }
}

fn invalid_duration(duration_ms: i64, operation: &str) -> WsscError {
    WsscError::InvalidDuration {
        duration_ms,
        context: ErrorContext::new(COMPONENT)
            .with_operation(operation)
            .with_suggestion("Use a positive session duration"),
    }
}
