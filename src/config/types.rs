use std::fmt;
use std::path::PathBuf;

/// Default listening port when neither the command line nor the `port`
/// file supplies one.
pub const DEFAULT_PORT: u16 = 1022;

/// Host key files looked up in the config directory, in load order.
pub const HOST_KEY_FILES: &[&str] = &[
    "ssh_host_dsa_key",
    "ssh_host_ecdsa_key",
    "ssh_host_ed25519_key",
    "ssh_host_rsa_key",
    "id_rsa",
];

/// File a generated host key is written to with `--persist-host-key`.
pub const GENERATED_HOST_KEY_FILE: &str = "ssh_host_ed25519_key";

pub const PORT_FILE: &str = "port";
pub const NODAEMON_FILE: &str = "nodaemon";
pub const DEBUG_FILE: &str = "debug";
pub const SETUID_FILE: &str = "setuid";
pub const PASSWD_FILE: &str = "passwd";
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Startup switches read once from the config directory. Every component that
/// needs one of them receives it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    pub daemonize: bool,
    pub debug: bool,
    pub setuid: bool,
    /// Absolute path of the credential list; `Some` enables password auth.
    pub passwd: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            daemonize: true,
            debug: false,
            setuid: false,
            passwd: None,
        }
    }
}
