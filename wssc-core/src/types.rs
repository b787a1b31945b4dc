//! Core data structures shared by the session and persistence crates

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The authenticated principal a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Identity provider that authenticated the user
    pub provider_id: String,
    /// User identifier, unique within the provider
    pub user_id: String,
    /// Login name
    pub login: String,
}

impl Identity {
    pub fn new(
        provider_id: impl Into<String>,
        user_id: impl Into<String>,
        login: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            user_id: user_id.into(),
            login: login.into(),
        }
    }
}

/// Kind of proof the owner presented during primary authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialFormat {
    ClearText,
    Digest,
    ClientCertificate,
    Saml,
    Kerberos,
    SecureConversation,
    Other(String),
}

/// The original authentication proof a session was created from.
///
/// Only the description of the proof is kept, never the password or token
/// itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub format: CredentialFormat,
}

impl Credentials {
    pub fn new(login: impl Into<String>, format: CredentialFormat) -> Self {
        Self {
            login: login.into(),
            format,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsscConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Key sizes, entropy ranges and sweep cadence of the in-memory session layer.
/// All sizes are in bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Key length used when the requester does not ask for one
    pub default_key_size: usize,
    pub min_key_size: usize,
    pub max_key_size: usize,
    /// Per-namespace default key length, overriding `default_key_size`
    pub namespace_key_sizes: Vec<NamespaceKeySize>,
    pub min_client_entropy: usize,
    pub max_client_entropy: usize,
    pub min_server_entropy: usize,
    pub max_server_entropy: usize,
    pub min_shared_secret: usize,
    pub max_shared_secret: usize,
    /// Minimum time between two expiration sweeps of the session store
    pub sweep_interval_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_key_size: 32,
            min_key_size: 16,
            max_key_size: 64,
            namespace_key_sizes: vec![NamespaceKeySize {
                namespace: "http://schemas.xmlsoap.org/ws/2005/02/sc".to_string(),
                key_size: 16,
            }],
            min_client_entropy: 16,
            max_client_entropy: 1024,
            min_server_entropy: 16,
            max_server_entropy: 1024,
            min_shared_secret: 16,
            max_shared_secret: 1024,
            sweep_interval_ms: 5 * 60 * 1000,
        }
    }
}

impl SessionConfig {
    /// Default key length for a namespace, falling back to `default_key_size`
    pub fn default_key_size_for(&self, namespace: Option<&str>) -> usize {
        namespace
            .and_then(|ns| {
                self.namespace_key_sizes
                    .iter()
                    .find(|entry| entry.namespace == ns)
            })
            .map(|entry| entry.key_size)
            .unwrap_or(self.default_key_size)
    }
}

/// Default key length for one protocol namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceKeySize {
    pub namespace: String,
    pub key_size: usize,
}

/// Clustered persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Keep sessions in the shared store; when false the store is wiped on maintenance
    pub cluster_sessions_enabled: bool,
    /// Interval of the stale-session maintenance task
    pub maintenance_interval_ms: u64,
    /// Database holding persisted sessions
    pub database_url: String,
    /// Environment variable carrying the cluster master passphrase
    pub master_passphrase_env: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_sessions_enabled: false,
            maintenance_interval_ms: 10 * 60 * 1000,
            database_url: "sqlite://wssc-sessions.db".to_string(),
            master_passphrase_env: "WSSC_CLUSTER_PASSPHRASE".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Period of the stale-session maintenance task
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}
