use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::path::Path;

/// Prefix marking a `passwd` entry whose password field is an Argon2 PHC string.
const ARGON2_PREFIX: &str = "$argon2";

/// One `user:password` entry of the credential list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    /// Exact match, or Argon2 verification when the stored value is a hash.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        if self.username != username {
            return false;
        }
        if self.password.starts_with(ARGON2_PREFIX) {
            verify_password(password, &self.password)
        } else {
            self.password == password
        }
    }
}

/// Parse credential list text. Lines are trimmed; blank lines, `#` comments
/// and lines without a `:` separator are skipped. Only the first `:` splits,
/// so passwords may contain colons.
pub fn parse_credentials(text: &str) -> Vec<Credential> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (username, password) = line.split_once(':')?;
            Some(Credential {
                username: username.to_string(),
                password: password.to_string(),
            })
        })
        .collect()
}

/// Read the credential list from disk. Called on every attempt; never cached.
pub fn read_credentials(path: &Path) -> std::io::Result<Vec<Credential>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_credentials(&text))
}

/// Hash a password using Argon2id with default OWASP-recommended parameters.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(19456, 2, 1, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?,
    );
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2 hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable password hash in passwd");
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
