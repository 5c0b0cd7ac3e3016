//! HMAC-SHA256 authentication of webhook deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("signature header is malformed: {reason}")]
    Malformed { reason: &'static str },
    #[error("signature does not match payload")]
    Mismatch,
    #[error("webhook secret is not configured")]
    NoSecret,
    #[error("webhook secret cannot key HMAC-SHA256")]
    InvalidKey,
}

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign(body: &[u8], secret: &[u8]) -> Result<String, SignatureError> {
    let mut mac = keyed(secret)?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn keyed(secret: &[u8]) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)
}

#[derive(Clone)]
pub struct SignatureValidator {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("secret", &"***")
            .finish()
    }
}

impl SignatureValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Check `claimed` (the raw header value) against the exact bytes received.
    pub fn validate(&self, body: &[u8], claimed: Option<&str>) -> Result<(), SignatureError> {
        if self.secret.is_empty() {
            return Err(SignatureError::NoSecret);
        }
        let claimed = claimed.map(str::trim).filter(|value| !value.is_empty());
        let claimed = claimed.ok_or(SignatureError::Missing)?;
        let hex_digest = claimed
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or(SignatureError::Malformed {
                reason: "expected sha256= prefix",
            })?;
        let expected = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed {
            reason: "digest is not hex",
        })?;

        let mut mac = keyed(&self.secret)?;
        mac.update(body);
        // verify_slice compares in constant time.
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}
