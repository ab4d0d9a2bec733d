use russh::keys::{Algorithm, PrivateKey, PublicKey, PublicKeyBase64};
use sshdog::auth::pubkey;

/// Helper: generate a key pair and produce an authorized_keys line for it.
fn gen_authorized_keys_line() -> (PrivateKey, PublicKey, String) {
    let kp = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).unwrap();
    let pubkey = PublicKey::from(&kp);
    let b64 = pubkey.public_key_base64();
    let line = format!("ssh-ed25519 {b64} test@test");
    (kp, pubkey, line)
}

#[test]
fn parse_valid_ed25519_key() {
    let (_kp, expected_pubkey, line) = gen_authorized_keys_line();
    let parsed = pubkey::parse_authorized_key(&line).expect("should parse a valid ed25519 key");
    assert_eq!(parsed, expected_pubkey);
}

#[test]
fn parse_key_with_options_prefix() {
    let (_kp, expected_pubkey, line) = gen_authorized_keys_line();
    let line = format!("no-pty,command=\"/bin/true\" {line}");
    let parsed = pubkey::parse_authorized_key(&line).unwrap();
    assert_eq!(parsed, expected_pubkey);
}

#[test]
fn parse_invalid_key_returns_error() {
    assert!(pubkey::parse_authorized_key("not-a-valid-key-line").is_err());
    assert!(pubkey::parse_authorized_key("ssh-ed25519 !!!bad!!! comment").is_err());
}

#[test]
fn blob_stops_at_first_malformed_entry() {
    let (_k1, first, line1) = gen_authorized_keys_line();
    let (_k2, _second, line2) = gen_authorized_keys_line();
    let text = format!("# keys\n\n{line1}\nssh-ed25519 garbage\n{line2}\n");

    let (keys, err) = pubkey::parse_authorized_keys(&text);
    assert_eq!(keys, vec![first], "entries before the bad one are kept");
    assert!(err.is_some());
}

#[test]
fn canonical_form_ignores_comment() {
    let (_kp, key, line) = gen_authorized_keys_line();
    let other_comment = line.replace("test@test", "someone@else");
    let parsed = pubkey::parse_authorized_key(&other_comment).unwrap();
    assert_eq!(pubkey::canonical(&parsed), pubkey::canonical(&key));
}

#[test]
fn fingerprint_is_openssh_style() {
    let (_kp, key, _line) = gen_authorized_keys_line();
    let fp = pubkey::fingerprint(&key);
    assert!(fp.starts_with("SHA256:"));
    // 32-byte digest, unpadded base64
    assert_eq!(fp.len(), "SHA256:".len() + 43);
    assert_eq!(fp, pubkey::fingerprint(&key));
}
