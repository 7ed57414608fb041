//! End-to-end laws for tenant identity: generated uids must survive the
//! sanitization pipeline unchanged, and the names derived from them must
//! be reproducible by forward construction (the audit job depends on it).

use console_core::{auth, idents};

#[test]
fn generated_uids_are_already_sanitized() {
    for email in [
        "a@b.com",
        "Jabberwocky.238@example.com",
        "UPPER.case-name@example.com",
        "12345@example.com",
    ] {
        let uid = auth::generate_uid(email);
        assert_eq!(uid.len(), 12);
        assert_eq!(
            idents::sanitize(&uid),
            uid,
            "uid {uid} from {email} should not change under sanitization"
        );
    }
}

#[test]
fn database_names_reconstruct_deterministically() {
    let uid = auth::generate_uid("tenant@example.com");

    let first = idents::rdb_database(&uid);
    let second = idents::rdb_database(&uid);
    assert_eq!(first, second);
    assert!(first.starts_with("db_"));
    assert_eq!(first, format!("db_{uid}"));
}

#[test]
fn signing_handshake_works_with_a_fresh_secret_key() {
    let secret_key = auth::generate_secret_key();
    let body = br#"{"user_uid":"tenant147008","worker_id":"w1","image":"img:1","port":8080}"#;
    let timestamp = "1700000000";

    let signature = auth::sign_payload(&secret_key, body, timestamp);
    auth::verify_signature(&secret_key, body, timestamp, &signature)
        .expect("freshly issued key must verify its own signature");

    let other_key = auth::generate_secret_key();
    assert!(auth::verify_signature(&other_key, body, timestamp, &signature).is_err());
}
