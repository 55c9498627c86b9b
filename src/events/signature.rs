//! Slack request signature verification
//!
//! Slack signs `v0:{timestamp}:{body}` with the app's signing secret and sends
//! `X-Slack-Signature: v0=<hex>` along with `X-Slack-Request-Timestamp`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Requests older than this are rejected as possible replays
const MAX_CLOCK_SKEW_SECS: u64 = 60 * 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature headers")]
    MissingHeaders,

    #[error("request timestamp outside the allowed window")]
    StaleTimestamp,

    #[error("signature mismatch")]
    Mismatch,
}

/// Checks that requests really come from Slack
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify_at(timestamp, signature, body, Utc::now().timestamp())
    }

    /// Verify against an explicit current unix time
    pub fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(SignatureError::MissingHeaders);
        };

        let ts: i64 = timestamp.parse().map_err(|_| SignatureError::StaleTimestamp)?;
        if now.abs_diff(ts) > MAX_CLOCK_SKEW_SECS {
            return Err(SignatureError::StaleTimestamp);
        }

        let expected = signature
            .strip_prefix("v0=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or(SignatureError::Mismatch)?;

        let mac = mac_for(self.secret.expose_secret(), timestamp, body)?;
        mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
    }
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

/// `v0=<hex>` signature Slack would send for `body` at `timestamp`
pub fn compute_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, SignatureError> {
    let mac = mac_for(secret, timestamp, body)?;
    Ok(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}
