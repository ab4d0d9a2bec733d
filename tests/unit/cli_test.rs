use clap::error::ErrorKind;
use clap::Parser;
use sshdog::cli::{exit_code, Cli};
use sshdog::config::types::LogFormat;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------
#[test]
fn defaults() {
    let cli = Cli::try_parse_from(["sshdog"]).unwrap();
    assert_eq!(cli.config.to_str().unwrap(), "config");
    assert!(cli.port.is_none());
    assert!(!cli.stop);
    assert!(cli.log_level.is_none());
    assert_eq!(cli.log_format, LogFormat::Pretty);
    assert!(!cli.persist_host_key);
}

#[test]
fn port_positional_is_kept_verbatim() {
    let cli = Cli::try_parse_from(["sshdog", "2222"]).unwrap();
    assert_eq!(cli.port.as_deref(), Some("2222"));
    let cli = Cli::try_parse_from(["sshdog", "not-a-port"]).unwrap();
    assert_eq!(cli.port.as_deref(), Some("not-a-port"));
}

#[test]
fn custom_config_dir() {
    let cli = Cli::try_parse_from(["sshdog", "-c", "/etc/sshdog"]).unwrap();
    assert_eq!(cli.config.to_str().unwrap(), "/etc/sshdog");
}

// ---------------------------------------------------------------------------
// Stop flag spellings
// ---------------------------------------------------------------------------
#[test]
fn stop_flag_spellings() {
    for flag in ["--stop", "--kill", "--exit", "-s", "-k"] {
        let cli = Cli::try_parse_from(["sshdog", flag]).unwrap();
        assert!(cli.stop, "{flag} should request a stop");
    }
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------
#[test]
fn help_exits_2() {
    let err = Cli::try_parse_from(["sshdog", "-h"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    assert_eq!(exit_code(&err), 2);
    assert!(err.to_string().contains("authorized_keys"), "help shows the config contract");
}

#[test]
fn version_exits_0() {
    let err = Cli::try_parse_from(["sshdog", "--version"]).unwrap_err();
    assert_eq!(exit_code(&err), 0);
}

#[test]
fn usage_errors_exit_1() {
    let err = Cli::try_parse_from(["sshdog", "1022", "extra"]).unwrap_err();
    assert_eq!(exit_code(&err), 1);
    let err = Cli::try_parse_from(["sshdog", "--bogus"]).unwrap_err();
    assert_eq!(exit_code(&err), 1);
}

#[test]
fn json_log_format() {
    let cli = Cli::try_parse_from(["sshdog", "--log-format", "json"]).unwrap();
    assert_eq!(cli.log_format, LogFormat::Json);
}

#[test]
fn help_warns_about_hash_prefix_in_plain_passwords() {
    let err = Cli::try_parse_from(["sshdog", "--help"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    let help = err.to_string();
    assert!(help.contains("authorized_keys"));
    assert!(help.contains("cannot start with `$argon2`"), "{}", help);
}
