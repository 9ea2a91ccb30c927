//! Session cookie extraction and signature verification.
//!
//! Signed values have the form `s:<token>.<signature>`, where the signature is
//! the unpadded standard base64 of HMAC-SHA256(secret, token). Browsers send
//! the value percent-encoded.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use percent_encoding::percent_decode_str;
use ring::hmac;

use super::{SessionError, SessionToken};

const SIGNED_PREFIX: &str = "s:";

/// Find a cookie by name across every `Cookie` header, percent-decoded.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| {
            let value = value.trim().trim_matches('"');
            percent_decode_str(value).decode_utf8_lossy().into_owned()
        })
}

/// Verifies (and, for tooling and tests, produces) signed session cookies.
#[derive(Clone)]
pub struct CookieSigner {
    key: hmac::Key,
}

impl CookieSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Produce the signed cookie value for a token.
    pub fn sign(&self, token: &str) -> String {
        let tag = hmac::sign(&self.key, token.as_bytes());
        format!("{}{}.{}", SIGNED_PREFIX, token, STANDARD_NO_PAD.encode(tag.as_ref()))
    }

    /// Strip and verify the signature, yielding the session store key.
    pub fn unsign(&self, value: &str) -> Result<SessionToken, SessionError> {
        let signed = value
            .strip_prefix(SIGNED_PREFIX)
            .ok_or(SessionError::MalformedToken)?;
        let (token, signature) = signed
            .rsplit_once('.')
            .ok_or(SessionError::MalformedToken)?;

        if token.is_empty() {
            return Err(SessionError::MalformedToken);
        }

        let signature = STANDARD_NO_PAD
            .decode(signature.trim_end_matches('='))
            .map_err(|_| SessionError::MalformedToken)?;

        hmac::verify(&self.key, token.as_bytes(), &signature)
            .map_err(|_| SessionError::MalformedToken)?;

        Ok(SessionToken::new(token))
    }
}
