use crate::error::ServerError;
use anyhow::{Context, Result};
use russh::keys::{Algorithm, PrivateKey};
use std::path::Path;

/// Decode a host private key (OpenSSH, PKCS#8 or legacy PEM). Encrypted keys
/// are not supported since there is nobody to ask for a passphrase.
pub fn parse_host_key(bytes: &[u8]) -> Result<PrivateKey, ServerError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ServerError::KeyParse("host key is not valid UTF-8".into()))?;
    russh::keys::decode_secret_key(text, None)
        .map_err(|e| ServerError::KeyParse(format!("decoding host key: {}", e)))
}

pub fn generate_host_key() -> Result<PrivateKey, ServerError> {
    PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).map_err(|e| {
        tracing::error!(error = %e, "Ed25519 key generation failed");
        ServerError::NoHostIdentity
    })
}

/// Write a host key as PKCS#8 PEM, readable by the owner only.
pub fn save_host_key(key: &PrivateKey, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    russh::keys::encode_pkcs8_pem(key, &mut buf)
        .map_err(|e| anyhow::anyhow!("encoding host key: {}", e))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("creating host key file: {}", path.display()))?;
        file.write_all(&buf)
            .with_context(|| format!("writing host key: {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, &buf)
            .with_context(|| format!("writing host key: {}", path.display()))?;
    }

    Ok(())
}
