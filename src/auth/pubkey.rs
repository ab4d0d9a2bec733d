use anyhow::Result;
use base64::Engine;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};

/// Parse one OpenSSH authorized_keys line into a PublicKey.
///
/// Accepts `[options] keytype base64 [comment]`: the key blob is the first
/// whitespace-separated field, after the first, that decodes.
pub fn parse_authorized_key(line: &str) -> Result<PublicKey> {
    let mut fields = line.split_whitespace();
    if fields.next().is_none() {
        anyhow::bail!("empty authorized_key entry");
    }
    let mut last_err = None;
    for field in fields {
        match russh::keys::parse_public_key_base64(field) {
            Ok(key) => return Ok(key),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(anyhow::anyhow!("failed to parse public key: {}", e)),
        None => Err(anyhow::anyhow!("invalid authorized_key format: {}", line)),
    }
}

/// Parse a concatenated authorized_keys blob.
///
/// Stops at the first malformed entry: the keys parsed before it are
/// returned along with the error. Blank lines and `#` comments are skipped.
pub fn parse_authorized_keys(text: &str) -> (Vec<PublicKey>, Option<anyhow::Error>) {
    let mut keys = Vec::new();
    for line in text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
    {
        match parse_authorized_key(line) {
            Ok(key) => keys.push(key),
            Err(e) => return (keys, Some(e)),
        }
    }
    (keys, None)
}

/// Canonical encoding used to compare keys: the base64 wire blob.
pub fn canonical(key: &PublicKey) -> String {
    key.public_key_base64()
}

/// OpenSSH-style `SHA256:` fingerprint of the key blob.
pub fn fingerprint(key: &PublicKey) -> String {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(canonical(key))
        .unwrap_or_default();
    let hash = Sha256::digest(&key_bytes);
    format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash)
    )
}
