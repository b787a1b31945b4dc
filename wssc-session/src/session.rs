//! Secure conversation session entity

use crate::deriver::SessionKeyDeriver;
use std::fmt;
use wssc_core::{creation_error, Credentials, Identity, WsscResult};
use zeroize::Zeroizing;

/// Key material that is zeroed on drop and never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.len())
    }
}

/// A negotiated security context.
///
/// Immutable once built; stores hand out `Arc<Session>`.
#[derive(Debug, Clone)]
pub struct Session {
    identifier: String,
    namespace: Option<String>,
    client_entropy: Option<SecretBytes>,
    server_entropy: Option<SecretBytes>,
    shared_secret: SecretBytes,
    creation: i64,
    expiration: i64,
    owner: Identity,
    credentials: Option<Credentials>,
    service_url: Option<String>,
}

impl Session {
    /// Start building a session around its identifier and shared secret
    pub fn builder(identifier: impl Into<String>, shared_secret: SecretBytes) -> SessionBuilder {
        SessionBuilder {
            identifier: identifier.into(),
            namespace: None,
            client_entropy: None,
            server_entropy: None,
            shared_secret,
            creation: 0,
            expiration: 0,
            owner: None,
            credentials: None,
            service_url: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn client_entropy(&self) -> Option<&[u8]> {
        self.client_entropy.as_ref().map(SecretBytes::as_bytes)
    }

    pub fn server_entropy(&self) -> Option<&[u8]> {
        self.server_entropy.as_ref().map(SecretBytes::as_bytes)
    }

    pub fn shared_secret(&self) -> &[u8] {
        self.shared_secret.as_bytes()
    }

    /// Creation time, epoch milliseconds
    pub fn creation(&self) -> i64 {
        self.creation
    }

    /// Expiration time, epoch milliseconds
    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Target service of an outbound session
    pub fn service_url(&self) -> Option<&str> {
        self.service_url.as_deref()
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expiration
    }

    /// Milliseconds left before expiry, zero once expired
    pub fn remaining_millis(&self, now_millis: i64) -> i64 {
        (self.expiration - now_millis).max(0)
    }

    /// Compute a key from the exchanged entropies.
    ///
    /// Returns `None` unless both client and server entropy were recorded.
    pub fn computed_key(
        &self,
        deriver: &SessionKeyDeriver,
        key_size: usize,
    ) -> WsscResult<Option<SecretBytes>> {
        match (&self.client_entropy, &self.server_entropy) {
            (Some(client), Some(server)) => deriver
                .derive(client.as_bytes(), server.as_bytes(), key_size)
                .map(Some),
            _ => Ok(None),
        }
    }
}

/// Builder enforcing the session invariants at construction
#[derive(Debug)]
pub struct SessionBuilder {
    identifier: String,
    namespace: Option<String>,
    client_entropy: Option<SecretBytes>,
    server_entropy: Option<SecretBytes>,
    shared_secret: SecretBytes,
    creation: i64,
    expiration: i64,
    owner: Option<Identity>,
    credentials: Option<Credentials>,
    service_url: Option<String>,
}

impl SessionBuilder {
    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn client_entropy(mut self, entropy: Option<SecretBytes>) -> Self {
        self.client_entropy = entropy;
        self
    }

    pub fn server_entropy(mut self, entropy: Option<SecretBytes>) -> Self {
        self.server_entropy = entropy;
        self
    }

    pub fn validity(mut self, creation: i64, expiration: i64) -> Self {
        self.creation = creation;
        self.expiration = expiration;
        self
    }

    pub fn owner(mut self, owner: Identity) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn service_url(mut self, service_url: Option<String>) -> Self {
        self.service_url = service_url;
        self
    }

    pub fn build(self) -> WsscResult<Session> {
        if self.identifier.trim().is_empty() {
            return Err(creation_error!("session identifier is blank", "session"));
        }
        if self.shared_secret.is_empty() {
            return Err(creation_error!("shared secret is empty", "session"));
        }
        if self.expiration <= self.creation {
            return Err(creation_error!(
                format!(
                    "expiration ({}) must be after creation ({})",
                    self.expiration, self.creation
                ),
                "session"
            ));
        }
        let Some(owner) = self.owner else {
            return Err(creation_error!("session has no owner", "session"));
        };

        Ok(Session {
            identifier: self.identifier,
            namespace: self.namespace,
            client_entropy: self.client_entropy,
            server_entropy: self.server_entropy,
            shared_secret: self.shared_secret,
            creation: self.creation,
            expiration: self.expiration,
            owner,
            credentials: self.credentials,
            service_url: self.service_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wssc_core::WsscError;

    fn alice() -> Identity {
        Identity::new("internal", "1", "alice")
    }

    #[test]
    fn test_build_and_expiry_boundary() {
        let session = Session::builder("urn:uuid:abc", SecretBytes::new(vec![7; 32]))
            .validity(1_000, 2_000)
            .owner(alice())
            .build()
            .unwrap();

        assert!(!session.is_expired(1_999));
        assert!(session.is_expired(2_000));
        assert_eq!(session.remaining_millis(1_500), 500);
        assert_eq!(session.remaining_millis(5_000), 0);
    }

    #[test]
    fn test_expiration_must_follow_creation() {
        let result = Session::builder("id", SecretBytes::new(vec![1; 16]))
            .validity(2_000, 2_000)
            .owner(alice())
            .build();
        assert!(matches!(result, Err(WsscError::SessionCreation { .. })));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = Session::builder("id", SecretBytes::new(Vec::new()))
            .validity(0, 10)
            .owner(alice())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let session = Session::builder("id", SecretBytes::new(vec![0xAB; 16]))
            .validity(0, 10)
            .owner(alice())
            .build()
            .unwrap();
        let printed = format!("{:?}", session);
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("171"));
    }

    #[test]
    fn test_computed_key_needs_both_entropies() {
        let deriver = SessionKeyDeriver::default();
        let only_client = Session::builder("id", SecretBytes::new(vec![1; 16]))
            .client_entropy(Some(SecretBytes::new(vec![1; 16])))
            .validity(0, 10)
            .owner(alice())
            .build()
            .unwrap();
        assert!(only_client.computed_key(&deriver, 32).unwrap().is_none());

        let both = Session::builder("id", SecretBytes::new(vec![1; 16]))
            .client_entropy(Some(SecretBytes::new(vec![1; 16])))
            .server_entropy(Some(SecretBytes::new(vec![2; 16])))
            .validity(0, 10)
            .owner(alice())
            .build()
            .unwrap();
        let key = both.computed_key(&deriver, 32).unwrap().unwrap();
        assert_eq!(key.len(), 32);
    }
}
