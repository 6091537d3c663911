//! Keyed integrity signatures for metrics.
//!
//! A signature is the hex-encoded HMAC-SHA-256 of [`Metric::canonical`] under
//! a shared key. An empty key disables both signing and verification.

use crate::core::error::{MetricsError, Result};
use crate::core::types::Metric;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(key: &str, canonical: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| MetricsError::crypto(format!("invalid HMAC key: {}", e)))?;
    mac.update(canonical.as_bytes());
    Ok(mac)
}

/// Signs a canonical string, returning lowercase hex.
pub fn sign(canonical: &str, key: &str) -> Result<String> {
    Ok(hex::encode(mac_for(key, canonical)?.finalize().into_bytes()))
}

/// Attaches a fresh signature to `metric` when a key is configured.
pub fn attach(metric: &mut Metric, key: &str) -> Result<()> {
    if key.is_empty() {
        return Ok(());
    }
    metric.hash = Some(sign(&metric.canonical()?, key)?);
    Ok(())
}

/// Verifies the signature carried by `metric`.
///
/// Unsigned metrics pass, as does everything when no key is configured.
pub fn verify(metric: &Metric, key: &str) -> Result<()> {
    let Some(signature) = metric.signature() else {
        return Ok(());
    };
    if key.is_empty() {
        return Ok(());
    }

    let provided = hex::decode(signature)
        .map_err(|_| MetricsError::bad_request(format!("malformed hash for '{}'", metric.id)))?;
    mac_for(key, &metric.canonical()?)?
        .verify_slice(&provided)
        .map_err(|_| MetricsError::bad_request(format!("wrong hash in request for '{}'", metric.id)))
}
