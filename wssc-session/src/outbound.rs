//! Outbound Session Manager - sessions established with remote services
//!
//! The remote service issues the identifier; local lookups go through the
//! local user and the target service URL. Lookups by identifier use the
//! store's secondary index.

use crate::persistence::SessionPersistence;
use crate::session::{SecretBytes, Session};
use crate::store::{SessionKey, SessionStore};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wssc_core::{
    creation_error, lookup_error, Credentials, ErrorContext, Identity, SessionConfig, WsscError,
    WsscResult,
};

const COMPONENT: &str = "outbound_session_manager";

/// A session negotiated by this node with a remote service.
///
/// Exactly one key material mode must be supplied: a shared secret, client
/// entropy alone, or client and server entropy together.
#[derive(Debug, Clone)]
pub struct OutboundSessionRequest {
    pub owner: Identity,
    pub service_url: String,
    pub credentials: Option<Credentials>,
    pub namespace: Option<String>,
    /// Identifier assigned by the remote service
    pub identifier: String,
    pub duration_ms: i64,
    pub client_entropy: Option<SecretBytes>,
    pub server_entropy: Option<SecretBytes>,
    pub shared_secret: Option<SecretBytes>,
}

impl OutboundSessionRequest {
    pub fn new(
        owner: Identity,
        service_url: impl Into<String>,
        identifier: impl Into<String>,
        duration_ms: i64,
    ) -> Self {
        Self {
            owner,
            service_url: service_url.into(),
            credentials: None,
            namespace: None,
            identifier: identifier.into(),
            duration_ms,
            client_entropy: None,
            server_entropy: None,
            shared_secret: None,
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

    pub fn with_shared_secret(mut self, secret: impl Into<SecretBytes>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    pub fn with_client_entropy(mut self, entropy: impl Into<SecretBytes>) -> Self {
        self.client_entropy = Some(entropy.into());
        self
    }

    pub fn with_server_entropy(mut self, entropy: impl Into<SecretBytes>) -> Self {
        self.server_entropy = Some(entropy.into());
        self
    }
}

struct KeyMaterial {
    shared_secret: SecretBytes,
    client_entropy: Option<SecretBytes>,
    server_entropy: Option<SecretBytes>,
}

pub struct OutboundSessionManager {
    store: Arc<SessionStore>,
    config: SessionConfig,
    persistence: Option<Arc<dyn SessionPersistence>>,
}

impl OutboundSessionManager {
    pub fn new(store: Arc<SessionStore>, config: SessionConfig) -> WsscResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            persistence: None,
        })
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn SessionPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn create_session(&self, request: OutboundSessionRequest) -> WsscResult<Arc<Session>> {
        if request.service_url.trim().is_empty() {
            return Err(creation_error!("service URL is blank", COMPONENT));
        }
        if request.owner.user_id.trim().is_empty() {
            return Err(creation_error!("owner has no user id", COMPONENT));
        }
        if request.duration_ms <= 0 {
            return Err(WsscError::InvalidDuration {
                duration_ms: request.duration_ms,
                context: ErrorContext::new(COMPONENT)
                    .with_operation("create_session")
                    .with_suggestion("Use a positive session duration"),
            });
        }

        let material = self.key_material(
            request.shared_secret,
            request.client_entropy,
            request.server_entropy,
        )?;

        let now = self.store.clock().now_millis();
        let expiration = now.saturating_add(request.duration_ms);

        let key = SessionKey::user_service(&request.owner.user_id, &request.service_url);
        let session = Session::builder(request.identifier, material.shared_secret)
            .namespace(request.namespace)
            .client_entropy(material.client_entropy)
            .server_entropy(material.server_entropy)
            .validity(now, expiration)
            .owner(request.owner)
            .credentials(request.credentials)
            .service_url(Some(request.service_url))
            .build()?;
        let session = Arc::new(session);

        if let Err(e) = self.store.save(key.clone(), Arc::clone(&session)) {
            warn!(key = %key, error = %e, "Rejected outbound session");
            return Err(e);
        }

        if let Some(persistence) = self.active_persistence() {
            if let Err(e) = persistence.save_outbound(&session).await {
                self.store.remove(&key);
                return Err(creation_error!("failed to persist session", COMPONENT, e));
            }
        }

        info!(
            identifier = session.identifier(),
            key = %key,
            "Created outbound session"
        );
        Ok(session)
    }

    /// Live session by the identifier the remote service assigned
    pub fn get_session_by_identifier(&self, identifier: &str) -> Option<Arc<Session>> {
        self.store
            .find_by_identifier(identifier)
            .map(|(_, session)| session)
    }

    /// Live session for a local user and target service
    pub fn get_session(&self, user_id: &str, service_url: &str) -> WsscResult<Option<Arc<Session>>> {
        let key = lookup_key(user_id, service_url)?;
        Ok(self.store.get(&key))
    }

    /// Like [`Self::get_session`], falling back to the persistent layer on a
    /// miss. Persistent entries are keyed by the full identity.
    pub async fn get_session_for_user(
        &self,
        owner: &Identity,
        service_url: &str,
    ) -> WsscResult<Option<Arc<Session>>> {
        let key = lookup_key(&owner.user_id, service_url)?;
        if let Some(session) = self.store.get(&key) {
            return Ok(Some(session));
        }

        let Some(persistence) = self.active_persistence() else {
            return Ok(None);
        };

        let found = persistence
            .find_outbound(owner, service_url)
            .await
            .map_err(|e| lookup_error!("failed to read persisted session", COMPONENT, e))?;

        let now = self.store.clock().now_millis();
        match found {
            Some(session) if !session.is_expired(now) => {
                let session = Arc::new(session);
                match self.store.save(key.clone(), Arc::clone(&session)) {
                    Ok(()) => {
                        debug!(key = %key, "Loaded outbound session from persistent store");
                        Ok(Some(session))
                    }
                    Err(e) if e.is_duplicate() => Ok(self.store.get(&key)),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(None),
        }
    }

    /// Cancel by remote identifier; the entry goes by its composite key
    pub async fn cancel_session_by_identifier(&self, identifier: &str) -> WsscResult<bool> {
        let Some((key, session)) = self.store.remove_by_identifier(identifier) else {
            return Ok(false);
        };

        self.delete_persisted(&session).await?;
        info!(identifier, key = %key, "Cancelled outbound session");
        Ok(true)
    }

    pub async fn cancel_session(&self, user_id: &str, service_url: &str) -> WsscResult<bool> {
        let key = lookup_key(user_id, service_url)?;
        let Some(session) = self.store.take(&key) else {
            return Ok(false);
        };

        self.delete_persisted(&session).await?;
        info!(identifier = session.identifier(), key = %key, "Cancelled outbound session");
        Ok(true)
    }

    /// Cancel by the full owner identity. The persistent row is deleted even
    /// when this node never cached the session.
    pub async fn cancel_session_for_user(
        &self,
        owner: &Identity,
        service_url: &str,
    ) -> WsscResult<bool> {
        let key = lookup_key(&owner.user_id, service_url)?;
        let removed = self.store.take(&key).is_some();

        let deleted = match self.active_persistence() {
            Some(persistence) => persistence.delete_outbound(owner, service_url).await?,
            None => false,
        };

        if removed || deleted {
            info!(key = %key, "Cancelled outbound session");
        }
        Ok(removed || deleted)
    }

    async fn delete_persisted(&self, session: &Session) -> WsscResult<()> {
        if let (Some(persistence), Some(service_url)) =
            (self.active_persistence(), session.service_url())
        {
            persistence
                .delete_outbound(session.owner(), service_url)
                .await?;
        }
        Ok(())
    }

    fn key_material(
        &self,
        shared_secret: Option<SecretBytes>,
        client_entropy: Option<SecretBytes>,
        server_entropy: Option<SecretBytes>,
    ) -> WsscResult<KeyMaterial> {
        let config = &self.config;
        match (shared_secret, client_entropy, server_entropy) {
            (Some(secret), None, None) => {
                check_length(
                    "shared secret",
                    &secret,
                    config.min_shared_secret..=config.max_shared_secret,
                )?;
                Ok(KeyMaterial {
                    shared_secret: secret,
                    client_entropy: None,
                    server_entropy: None,
                })
            }
            (None, Some(client), None) => {
                check_length(
                    "client entropy",
                    &client,
                    config.min_client_entropy..=config.max_client_entropy,
                )?;
                Ok(KeyMaterial {
                    shared_secret: client.clone(),
                    client_entropy: Some(client),
                    server_entropy: None,
                })
            }
            (None, Some(client), Some(server)) => {
                check_length(
                    "client entropy",
                    &client,
                    config.min_client_entropy..=config.max_client_entropy,
                )?;
                check_length(
                    "server entropy",
                    &server,
                    config.min_server_entropy..=config.max_server_entropy,
                )?;
                Ok(KeyMaterial {
                    shared_secret: client.clone(),
                    client_entropy: Some(client),
                    server_entropy: Some(server),
                })
            }
            (None, None, Some(_)) => Err(creation_error!(
                "server entropy was supplied without client entropy",
                COMPONENT
            )),
            (None, None, None) => Err(creation_error!(
                "no shared secret or client entropy was supplied",
                COMPONENT
            )),
            (Some(_), _, _) => Err(creation_error!(
                "a shared secret cannot be combined with entropy",
                COMPONENT
            )),
        }
    }

    fn active_persistence(&self) -> Option<&Arc<dyn SessionPersistence>> {
        self.persistence.as_ref().filter(|p| p.is_enabled())
    }
}

fn check_length(what: &str, bytes: &SecretBytes, range: RangeInclusive<usize>) -> WsscResult<()> {
    if range.contains(&bytes.len()) {
        return Ok(());
    }
    Err(creation_error!(
        format!(
            "{} of {} bytes is outside [{}, {}]",
            what,
            bytes.len(),
            range.start(),
            range.end()
        ),
        COMPONENT
    ))
}

fn lookup_key(user_id: &str, service_url: &str) -> WsscResult<SessionKey> {
    if user_id.trim().is_empty() {
        return Err(lookup_error!("user id is blank", COMPONENT));
    }
    if service_url.trim().is_empty() {
        return Err(lookup_error!("service URL is blank", COMPONENT));
    }
    Ok(SessionKey::user_service(user_id, service_url))
}
