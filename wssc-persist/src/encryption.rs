//! Cluster-wide encryption of session material at rest

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use wssc_core::{ErrorContext, WsscError, WsscResult};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Salt of the passphrase key derivation. Every node derives the same key
/// from the same passphrase.
const KEY_SALT: &[u8] = b"wssc-cluster-session-key";

/// Symmetric encryption shared by all nodes of a cluster
pub trait ClusterEncryption: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> WsscResult<String>;

    fn decrypt(&self, ciphertext: &str) -> WsscResult<Vec<u8>>;
}

/// AES-256-GCM under a key derived from the cluster master passphrase with
/// Argon2id. Output is base64 of `nonce || ciphertext || tag`.
pub struct PassphraseEncryption {
    cipher: Aes256Gcm,
}

impl PassphraseEncryption {
    pub fn new(passphrase: &str) -> WsscResult<Self> {
        if passphrase.is_empty() {
            return Err(encryption_error("cluster passphrase is empty", "new"));
        }

        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), KEY_SALT, &mut key[..])
            .map_err(|e| encryption_error(&format!("key derivation failed: {}", e), "new"))?;

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| encryption_error(&format!("invalid key: {}", e), "new"))?;
        Ok(Self { cipher })
    }

    /// Read the passphrase from the environment variable `var`
    pub fn from_env(var: &str) -> WsscResult<Self> {
        let passphrase = Zeroizing::new(std::env::var(var).map_err(|_| WsscError::Config {
            message: format!("environment variable {} is not set", var),
            source: None,
            context: ErrorContext::new("cluster_encryption")
                .with_operation("from_env")
                .with_suggestion("Export the cluster master passphrase before starting"),
        })?);
        Self::new(&passphrase)
    }
}

impl fmt::Debug for PassphraseEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassphraseEncryption { .. }")
    }
}

impl ClusterEncryption for PassphraseEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> WsscResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| encryption_error("encryption failed", "encrypt"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> WsscResult<Vec<u8>> {
        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| encryption_error(&format!("ciphertext is not base64: {}", e), "decrypt"))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(encryption_error("ciphertext is truncated", "decrypt"));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| encryption_error("ciphertext failed authentication", "decrypt"))
    }
}

fn encryption_error(message: &str, operation: &str) -> WsscError {
    WsscError::Encryption {
        message: message.to_string(),
        context: ErrorContext::new("cluster_encryption").with_operation(operation),
    }
}
