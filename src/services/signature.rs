use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks an `X-Hub-Signature-256: sha256=<hex>` header against the raw body.
/// Comparison is constant time.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> AppResult<()> {
    let provided = header
        .and_then(|h| h.trim().strip_prefix(SIGNATURE_PREFIX))
        .ok_or(AppError::InvalidSignature)?;
    let provided = hex::decode(provided).map_err(|_| AppError::InvalidSignature)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("mac init: {e}"))?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| AppError::InvalidSignature)
}

/// Header value for `body`. Used by tests and by anything replaying webhooks.
pub fn sign(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("mac init: {e}"))?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}
