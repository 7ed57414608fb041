//! Authentication and signing glue.
//!
//! Identifier generation, password hashing, session tokens, and the HMAC
//! request-signature scheme used by the deploy endpoint. The primitives
//! themselves come from `bcrypt`, `jsonwebtoken`, and `hmac`/`sha2`; this
//! module only fixes the formats the platform uses.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Cost factor for bcrypt password hashes.
const BCRYPT_COST: u32 = 12;

/// Total length of a generated tenant uid.
const UID_LENGTH: usize = 12;

/// Maximum number of email letters carried into a uid prefix.
const UID_MAX_PREFIX: usize = 6;

/// Session token lifetime in seconds.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Fallback prefixes for emails whose local part carries no letters.
const WORD_LIST: &[&str] = &[
    "apple", "banana", "cherry", "dragon", "eagle", "falcon", "grape", "honey", "ivory", "jungle",
    "koala", "lemon", "mango", "noble", "ocean", "panda", "queen", "river", "storm", "tiger",
    "ultra", "vivid", "whale", "xenon", "yacht", "zebra", "alpha", "brave", "coral", "delta",
    "ember", "frost", "ghost", "haven", "index", "joker", "karma", "lunar", "maple", "nexus",
    "orbit", "pixel", "quest", "radar", "solar", "terra", "unity", "venom", "wired", "zesty",
];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to hash password: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("failed to handle session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("the session token carries no user id")]
    MissingUserId,

    #[error("the signature is not valid base64url")]
    SignatureEncoding,

    #[error("the signature does not match the payload")]
    SignatureMismatch,
}

/// Generates a stable 12-character tenant uid from an email address.
///
/// The prefix is the lowercase letters of the local part (at most six); a
/// random word stands in when the local part has no letters. Random digits
/// fill the remainder.
pub fn generate_uid(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let letters: String = local
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .take(UID_MAX_PREFIX)
        .collect();

    let mut rng = rand::rng();
    let prefix = if letters.is_empty() {
        WORD_LIST[rng.random_range(0..WORD_LIST.len())].to_string()
    } else {
        letters
    };

    let digit_count = UID_LENGTH - prefix.len();
    let digits: String = (0..digit_count)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect();

    format!("{prefix}{digits}")
}

/// Generates a random 16-hex-character id for logical resources.
pub fn generate_resource_id() -> String {
    random_hex(8)
}

/// Generates a fresh per-tenant signing key, prefixed `sk_`.
pub fn generate_secret_key() -> String {
    format!("sk_{}", random_hex(16))
}

/// Generates a 32-hex-character domain verification token.
pub fn generate_verify_token() -> String {
    random_hex(16)
}

/// Generates a 6-digit verification code.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    format!("{:06}", rng.random_range(0..1_000_000u32))
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::rng();
    (0..bytes)
        .map(|_| format!("{:02x}", rng.random::<u8>()))
        .collect()
}

/// Hashes a password with bcrypt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, BCRYPT_COST)?)
}

/// Checks a password against a stored bcrypt hash.
pub fn check_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Claims carried by a session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub email: String,
    pub exp: i64,
}

/// Issues a session token for a user.
pub fn generate_token(secret: &[u8], user_id: &str, email: &str) -> Result<String, AuthError> {
    let claims = TokenClaims {
        user_id: user_id.to_string(),
        email: email.to_string(),
        exp: chrono::Utc::now().timestamp() + TOKEN_TTL_SECS,
    };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))?)
}

/// Validates a session token and returns the user id it carries.
pub fn validate_token(secret: &[u8], token: &str) -> Result<String, AuthError> {
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )?;

    if data.claims.user_id.is_empty() {
        return Err(AuthError::MissingUserId);
    }
    Ok(data.claims.user_id)
}

/// Signs `body || timestamp` with a tenant secret key.
///
/// Returns the base64url-no-pad encoding of the HMAC-SHA256 tag, the format
/// carried in `X-Combinator-Signature`.
pub fn sign_payload(secret_key: &str, body: &[u8], timestamp: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.update(timestamp.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Verifies a signature produced by [`sign_payload`].
pub fn verify_signature(
    secret_key: &str,
    body: &[u8],
    timestamp: &str,
    signature: &str,
) -> Result<(), AuthError> {
    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AuthError::SignatureEncoding)?;

    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.update(timestamp.as_bytes());
    let expected = mac.finalize().into_bytes();

    if !constant_time_eq(&provided, &expected) {
        return Err(AuthError::SignatureMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_keeps_email_letters_as_prefix() {
        let uid = generate_uid("a@b.com");
        assert_eq!(uid.len(), 12);
        assert!(uid.starts_with('a'));
        assert!(uid[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn uid_truncates_long_local_parts() {
        let uid = generate_uid("Jabberwocky.238@example.com");
        assert_eq!(uid.len(), 12);
        assert!(uid.starts_with("jabber"));
    }

    #[test]
    fn uid_falls_back_to_word_for_letterless_emails() {
        let uid = generate_uid("12345@example.com");
        assert_eq!(uid.len(), 12);
        assert!(WORD_LIST.iter().any(|w| uid.starts_with(w)));
    }

    #[test]
    fn secret_key_is_prefixed() {
        let key = generate_secret_key();
        assert!(key.starts_with("sk_"));
        assert_eq!(key.len(), 3 + 32);
    }

    #[test]
    fn code_is_six_digits() {
        let code = generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(check_password("hunter2", &hash));
        assert!(!check_password("hunter3", &hash));
    }

    #[test]
    fn token_round_trip() {
        let secret = b"test-secret";
        let token = generate_token(secret, "abc123456789", "a@b.com").unwrap();
        let user_id = validate_token(secret, &token).unwrap();
        assert_eq!(user_id, "abc123456789");
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let token = generate_token(b"one", "abc123456789", "a@b.com").unwrap();
        assert!(validate_token(b"two", &token).is_err());
    }

    #[test]
    fn signature_round_trip() {
        let body = br#"{"worker_id":"w1"}"#;
        let sig = sign_payload("sk_test", body, "1700000000");
        verify_signature("sk_test", body, "1700000000", &sig).unwrap();
    }

    #[test]
    fn signature_rejects_tampering() {
        let sig = sign_payload("sk_test", b"payload", "1700000000");
        assert!(verify_signature("sk_test", b"payload2", "1700000000", &sig).is_err());
        assert!(verify_signature("sk_test", b"payload", "1700000001", &sig).is_err());
        assert!(verify_signature("sk_other", b"payload", "1700000000", &sig).is_err());
        assert!(verify_signature("sk_test", b"payload", "1700000000", "!!!").is_err());
    }
}
