use russh::keys::PublicKeyBase64;
use sshdog::config::types::*;
use sshdog::config::ConfigDir;
use std::path::Path;
use tempfile::tempdir;

fn touch(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn client_key_line() -> String {
    let key = russh::keys::PrivateKey::random(
        &mut rand::rngs::OsRng,
        russh::keys::Algorithm::Ed25519,
    )
    .unwrap();
    format!("ssh-ed25519 {} c@d\n", key.public_key().public_key_base64())
}

#[test]
fn missing_dir_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(ConfigDir::open(&dir.path().join("config")).is_err());
    touch(dir.path(), "file", "");
    assert!(ConfigDir::open(&dir.path().join("file")).is_err());
}

#[test]
fn empty_dir_gives_defaults() {
    let dir = tempdir().unwrap();
    let cfg = ConfigDir::open(dir.path()).unwrap();
    let settings = cfg.load_settings(None);
    assert_eq!(settings.port, DEFAULT_PORT);
    assert!(settings.daemonize);
    assert!(!settings.debug);
    assert!(!settings.setuid);
    assert!(settings.passwd.is_none());
}

#[test]
fn presence_files_toggle_switches() {
    let dir = tempdir().unwrap();
    for name in [NODAEMON_FILE, DEBUG_FILE, SETUID_FILE, PASSWD_FILE] {
        touch(dir.path(), name, "");
    }
    let cfg = ConfigDir::open(dir.path()).unwrap();
    let settings = cfg.load_settings(None);
    assert!(!settings.daemonize);
    assert!(settings.debug);
    assert!(settings.setuid);
    let passwd = settings.passwd.unwrap();
    assert!(passwd.is_absolute());
    assert!(passwd.ends_with(PASSWD_FILE));
}

#[test]
fn port_precedence() {
    let dir = tempdir().unwrap();
    touch(dir.path(), PORT_FILE, "2200\n");
    let cfg = ConfigDir::open(dir.path()).unwrap();

    assert_eq!(cfg.resolve_port(Some("2300")), 2300);
    assert_eq!(cfg.resolve_port(None), 2200);
    assert_eq!(cfg.resolve_port(Some("nope")), 2200, "bad argument falls through");

    touch(dir.path(), PORT_FILE, "garbage");
    assert_eq!(cfg.resolve_port(None), DEFAULT_PORT);
}

#[test]
fn credentials_require_authorized_keys() {
    let dir = tempdir().unwrap();
    let cfg = ConfigDir::open(dir.path()).unwrap();
    let settings = cfg.load_settings(None);
    let err = cfg.load_credentials(&settings, false).unwrap_err();
    assert!(format!("{:#}", err).contains(AUTHORIZED_KEYS_FILE));
}

#[test]
fn ephemeral_key_is_not_written_unless_asked() {
    let dir = tempdir().unwrap();
    touch(dir.path(), AUTHORIZED_KEYS_FILE, &client_key_line());
    let cfg = ConfigDir::open(dir.path()).unwrap();
    let settings = cfg.load_settings(None);

    let store = cfg.load_credentials(&settings, false).unwrap();
    assert_eq!(store.host_keys().len(), 1);
    assert_eq!(store.authorized_key_count(), 1);
    assert!(!cfg.exists(GENERATED_HOST_KEY_FILE));

    let store = cfg.load_credentials(&settings, true).unwrap();
    assert!(cfg.exists(GENERATED_HOST_KEY_FILE));

    // The persisted identity is picked up on the next start.
    let reloaded = cfg.load_credentials(&settings, true).unwrap();
    assert_eq!(
        reloaded.host_keys()[0].public_key(),
        store.host_keys()[0].public_key()
    );
}

#[test]
fn unparsable_host_keys_are_skipped() {
    let dir = tempdir().unwrap();
    touch(dir.path(), AUTHORIZED_KEYS_FILE, &client_key_line());
    touch(dir.path(), "ssh_host_rsa_key", "not a key");
    let cfg = ConfigDir::open(dir.path()).unwrap();
    let settings = cfg.load_settings(None);

    let store = cfg.load_credentials(&settings, false).unwrap();
    assert_eq!(store.host_keys().len(), 1, "falls back to a generated key");
}

#[test]
fn passwd_enables_password_auth() {
    let dir = tempdir().unwrap();
    touch(dir.path(), AUTHORIZED_KEYS_FILE, "");
    touch(dir.path(), PASSWD_FILE, "alice:secret\n");
    let cfg = ConfigDir::open(dir.path()).unwrap();
    let settings = cfg.load_settings(None);

    let store = cfg.load_credentials(&settings, false).unwrap();
    assert!(store.password_enabled());
    assert!(store.verify_password("alice", "secret").is_ok());
}
