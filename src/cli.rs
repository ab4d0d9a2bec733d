use crate::config::types::LogFormat;
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;

/// Describes the config directory; printed under `--help`.
pub const CONFIG_CONTRACT: &str = "\
Configuration is read from files in the config directory:
  port              listening port (overridden by PORT)
  nodaemon          present: stay in the foreground
  debug             present: verbose diagnostics on stderr
  setuid            present: try to become root before serving
  passwd            enables password auth, one `user:password` per line,
                    `#` lines ignored, `$argon2...` values checked as hashes
                    (so a plain password cannot start with `$argon2`)
  authorized_keys   required, OpenSSH authorized_keys format
  host keys         ssh_host_dsa_key, ssh_host_ecdsa_key, ssh_host_ed25519_key,
                    ssh_host_rsa_key, id_rsa
If no host key loads, a random one is generated and the server
fingerprint changes on every start (see --persist-host-key).";

#[derive(Parser, Debug)]
#[command(
    name = "sshdog",
    version,
    about = "Minimal SSH daemon: shells, exec, scp and port forwarding",
    after_help = CONFIG_CONTRACT
)]
pub struct Cli {
    /// Listening port; a value that is not a port falls back to the config
    pub port: Option<String>,

    /// Configuration directory (also settable via SSHDOG_CONFIG env var)
    #[arg(short, long, default_value = "config", env = "SSHDOG_CONFIG")]
    pub config: PathBuf,

    /// Ask running instances of this program to exit, then quit
    #[arg(
        short = 's',
        long = "stop",
        visible_aliases = ["kill", "exit"],
        short_aliases = ['k']
    )]
    pub stop: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Save a generated host key into the config directory
    #[arg(long)]
    pub persist_host_key: bool,

    /// Print an Argon2 hash usable as a passwd entry, then exit
    #[arg(long, value_name = "PASSWORD")]
    pub hash_password: Option<String>,
}

/// Exit status for a failed parse: 2 after printing usage, 0 for
/// `--version`, 1 for anything the user got wrong.
pub fn exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 2,
        ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
