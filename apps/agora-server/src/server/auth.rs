use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header::COOKIE, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

use super::core::SESSION_COOKIE;

pub(crate) fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hash failed: {e}"))?
        .to_string();
    Ok(hash)
}

pub(crate) fn verify_password(stored_hash: &str, supplied_password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(supplied_password.as_bytes(), &parsed)
        .is_ok()
}

/// Mints an opaque session token: 32 random bytes, url-safe base64.
pub(crate) fn mint_session_token() -> String {
    let mut secret = [0_u8; 32];
    OsRng.fill_bytes(&mut secret);
    URL_SAFE_NO_PAD.encode(secret)
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

/// Session token presented by the client on the upgrade request, if any.
pub(crate) fn session_cookie_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            if name.trim() == SESSION_COOKIE && !value.trim().is_empty() {
                return Some(value.trim().to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

    use super::{
        hash_password, mint_session_token, now_unix, session_cookie_token, verify_password,
    };

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("super-secure-password").unwrap();
        assert!(verify_password(&hash, "super-secure-password"));
        assert!(!verify_password(&hash, "wrong-password"));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("not-a-phc-string", "anything"));
    }

    #[test]
    fn minted_tokens_are_unique_and_opaque() {
        let first = mint_session_token();
        let second = mint_session_token();
        assert_ne!(first, second);
        assert!(first.len() >= 40);
    }

    #[test]
    fn now_unix_is_positive() {
        assert!(now_unix() > 0);
    }

    #[test]
    fn cookie_token_is_extracted_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; agora_session_id=tok123; lang=en"),
        );
        assert_eq!(session_cookie_token(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn missing_or_empty_cookie_yields_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_cookie_token(&headers), None);
        headers.insert(COOKIE, HeaderValue::from_static("agora_session_id="));
        assert_eq!(session_cookie_token(&headers), None);
    }
}
