//! HMAC request signing for application-to-platform calls.
//!
//! `x-sign = base64url(HMAC-SHA256(secret, "<x-time>.<x-nonce>.<base64url(sha256(body))>"))`

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_APP_KEY: &str = "x-app-key";
pub const HEADER_TIME: &str = "x-time";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGN: &str = "x-sign";

/// Maximum skew between `x-time` and server time.
pub const FRESHNESS_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub app_key: String,
    pub time: String,
    pub nonce: String,
    pub signature: String,
}

impl SignedHeaders {
    /// Reads the four signing headers. Returns None if any is missing or blank.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Some(Self {
            app_key: read(HEADER_APP_KEY)?,
            time: read(HEADER_TIME)?,
            nonce: read(HEADER_NONCE)?,
            signature: read(HEADER_SIGN)?,
        })
    }

    /// Signs `body` on behalf of `app_key` with a fresh nonce and the current time.
    pub fn sign(app_key: &str, secret: &str, body: &[u8], now_ms: i64) -> Result<Self> {
        let time = now_ms.to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let signature = sign(secret, &time, &nonce, body)?;
        Ok(Self {
            app_key: app_key.to_string(),
            time,
            nonce,
            signature,
        })
    }

    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            (HEADER_APP_KEY, self.app_key.as_str()),
            (HEADER_TIME, self.time.as_str()),
            (HEADER_NONCE, self.nonce.as_str()),
            (HEADER_SIGN, self.signature.as_str()),
        ]
    }
}

#[must_use]
pub fn body_digest(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

fn signing_input(time: &str, nonce: &str, body: &[u8]) -> String {
    format!("{time}.{nonce}.{}", body_digest(body))
}

pub fn sign(secret: &str, time: &str, nonce: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid signing key: {e}")))?;
    mac.update(signing_input(time, nonce, body).as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature` against the expected value.
#[must_use]
pub fn verify(secret: &str, time: &str, nonce: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signing_input(time, nonce, body).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Parses `x-time` and checks it lies within the freshness window of `now_ms`.
pub fn parse_fresh_time(time: &str, now_ms: i64) -> Option<i64> {
    let time_ms = time.parse::<i64>().ok()?;
    (now_ms.abs_diff(time_ms) <= FRESHNESS_WINDOW_MS.unsigned_abs()).then_some(time_ms)
}
