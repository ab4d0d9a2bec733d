pub mod password;
pub mod pubkey;

use crate::error::ServerError;
use crate::ssh::keys;
use russh::keys::{PrivateKey, PublicKey};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Host identities and client authorization data.
///
/// Populated once before the listener starts and shared read-only behind an
/// `Arc` afterwards. The credential list is the exception: it lives on disk
/// and is re-read on every password attempt.
#[derive(Debug, Default)]
pub struct CredentialStore {
    host_keys: Vec<PrivateKey>,
    authorized_keys: HashSet<String>,
    passwd: Option<PathBuf>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a PEM/OpenSSH-encoded private key as an extra host identity.
    pub fn add_host_key(&mut self, bytes: &[u8]) -> Result<(), ServerError> {
        let key = keys::parse_host_key(bytes)?;
        debug!(algorithm = %key.algorithm(), "Host key added");
        self.host_keys.push(key);
        Ok(())
    }

    /// Generate a fresh Ed25519 identity. The returned key is also registered.
    pub fn generate_ephemeral_host_key(&mut self) -> Result<&PrivateKey, ServerError> {
        let key = keys::generate_host_key()?;
        debug!("Generated ephemeral host key; fingerprint changes on every start");
        self.host_keys.push(key);
        Ok(&self.host_keys[self.host_keys.len() - 1])
    }

    /// Add every entry of an authorized_keys blob.
    ///
    /// Parsing stops at the first malformed entry; keys before it stay
    /// registered and the error is returned. On success returns the number
    /// of entries read.
    pub fn add_authorized_keys(&mut self, bytes: &[u8]) -> Result<usize, ServerError> {
        let text = String::from_utf8_lossy(bytes);
        let (parsed, err) = pubkey::parse_authorized_keys(&text);
        let count = parsed.len();
        self.authorized_keys
            .extend(parsed.iter().map(pubkey::canonical));
        match err {
            Some(e) => Err(ServerError::KeyParse(format!(
                "authorized_keys entry {}: {}",
                count + 1,
                e
            ))),
            None => Ok(count),
        }
    }

    /// Enable password authentication against the credential list at `path`.
    pub fn enable_passwords(&mut self, path: PathBuf) {
        self.passwd = Some(path);
    }

    pub fn password_enabled(&self) -> bool {
        self.passwd.is_some()
    }

    pub fn host_keys(&self) -> &[PrivateKey] {
        &self.host_keys
    }

    pub fn authorized_key_count(&self) -> usize {
        self.authorized_keys.len()
    }

    /// Authorized iff the key's canonical encoding is in the set. The user
    /// name plays no part in the decision.
    pub fn verify_public_key(&self, user: &str, key: &PublicKey) -> Result<(), ServerError> {
        if self.authorized_keys.contains(&pubkey::canonical(key)) {
            Ok(())
        } else {
            Err(ServerError::denied(user))
        }
    }

    /// Re-read the credential list and look for an exact (user, password)
    /// entry. A missing or unreadable list denies.
    pub fn verify_password(&self, user: &str, password: &str) -> Result<(), ServerError> {
        let Some(path) = &self.passwd else {
            return Err(ServerError::denied(user));
        };
        let credentials = password::read_credentials(path).map_err(|e| {
            debug!(path = %path.display(), error = %e, "Cannot read credential list");
            ServerError::denied(user)
        })?;
        if credentials.iter().any(|c| c.matches(user, password)) {
            Ok(())
        } else {
            Err(ServerError::denied(user))
        }
    }
}
