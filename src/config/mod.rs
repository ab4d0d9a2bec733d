pub mod types;

use crate::auth::CredentialStore;
use crate::ssh::keys;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use types::*;

/// The durable configuration directory. Presence of a file is itself a
/// setting; see [`types`] for the file names.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    dir: PathBuf,
}

impl ConfigDir {
    /// Open `dir`, resolving it to an absolute path so later reads do not
    /// depend on the working directory.
    pub fn open(dir: &Path) -> Result<Self> {
        let meta = std::fs::metadata(dir)
            .with_context(|| format!("config directory {}", dir.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("{} is not a directory", dir.display());
        }
        let dir = std::fs::canonicalize(dir)
            .with_context(|| format!("resolving config directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file(name).is_file()
    }

    pub fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.file(name))
    }

    /// Read every switch. `port_arg` is the first positional argument, which
    /// takes precedence over the `port` file.
    pub fn load_settings(&self, port_arg: Option<&str>) -> Settings {
        let passwd = if self.exists(PASSWD_FILE) {
            let path = self.file(PASSWD_FILE);
            check_passwd_permissions(&path);
            Some(path)
        } else {
            None
        };
        Settings {
            port: self.resolve_port(port_arg),
            daemonize: !self.exists(NODAEMON_FILE),
            debug: self.exists(DEBUG_FILE),
            setuid: self.exists(SETUID_FILE),
            passwd,
        }
    }

    /// Command line, then the `port` file, then [`DEFAULT_PORT`].
    pub fn resolve_port(&self, port_arg: Option<&str>) -> u16 {
        if let Some(arg) = port_arg {
            match parse_port(arg) {
                Some(port) => return port,
                None => debug!(value = %arg, "Cannot parse port argument"),
            }
        }
        if let Ok(data) = self.read(PORT_FILE) {
            let text = String::from_utf8_lossy(&data);
            match parse_port(&text) {
                Some(port) => return port,
                None => debug!(value = %text.trim(), "Cannot parse port file"),
            }
        }
        DEFAULT_PORT
    }

    /// Build the credential store: host keys (or a generated one), the
    /// authorized key set and, if configured, the credential list path.
    ///
    /// A missing `authorized_keys` file aborts startup.
    pub fn load_credentials(
        &self,
        settings: &Settings,
        persist_generated_key: bool,
    ) -> Result<CredentialStore> {
        let mut store = CredentialStore::new();

        for name in HOST_KEY_FILES {
            let Ok(data) = self.read(name) else {
                continue;
            };
            debug!(file = %name, "Adding host key file");
            if let Err(e) = store.add_host_key(&data) {
                debug!(file = %name, error = %e, "Skipping host key");
            }
        }

        if store.host_keys().is_empty() {
            let key = store.generate_ephemeral_host_key()?;
            if persist_generated_key {
                let path = self.file(GENERATED_HOST_KEY_FILE);
                keys::save_host_key(key, &path)?;
                debug!(path = %path.display(), "Generated host key saved");
            }
        }

        let auth_data = self.read(AUTHORIZED_KEYS_FILE).with_context(|| {
            format!(
                "no authorized keys: {}",
                self.file(AUTHORIZED_KEYS_FILE).display()
            )
        })?;
        match store.add_authorized_keys(&auth_data) {
            Ok(n) => debug!(keys = n, "Authorized keys loaded"),
            Err(e) => debug!(
                error = %e,
                kept = store.authorized_key_count(),
                "Authorized keys partially loaded"
            ),
        }

        if let Some(path) = &settings.passwd {
            store.enable_passwords(path.clone());
            debug!(path = %path.display(), "Password authentication enabled; changing this requires a restart");
        }

        Ok(store)
    }
}

fn parse_port(text: &str) -> Option<u16> {
    text.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

/// The credential list holds secrets; note when others can read it.
#[cfg(unix)]
fn check_passwd_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            debug!(
                path = %path.display(),
                mode = format!("{:04o}", mode & 0o7777),
                "passwd is readable by group/others"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_passwd_permissions(_path: &Path) {}
