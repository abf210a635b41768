use crate::errors::ServiceError;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verifies `Stripe-Signature` style headers (`t=<unix>,v1=<hex hmac>`) over
/// the raw request body.
///
/// A verifier without a secret rejects everything.
#[derive(Clone, Debug)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            tolerance_secs,
        }
    }

    pub fn verify(&self, headers: &HeaderMap, payload: &[u8]) -> Result<(), ServiceError> {
        self.verify_at(headers, payload, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        headers: &HeaderMap,
        payload: &[u8],
        now: i64,
    ) -> Result<(), ServiceError> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            ServiceError::SignatureVerification("Webhook secret is not configured".to_string())
        })?;

        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                ServiceError::SignatureVerification("Missing signature header".to_string())
            })?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            ServiceError::SignatureVerification("Missing signature timestamp".to_string())
        })?;
        let signed_at: i64 = timestamp.parse().map_err(|_| {
            ServiceError::SignatureVerification("Invalid signature timestamp".to_string())
        })?;
        if (now - signed_at).unsigned_abs() > self.tolerance_secs {
            return Err(ServiceError::SignatureVerification(
                "Signature timestamp outside tolerance".to_string(),
            ));
        }

        let expected = compute_signature(secret, timestamp, payload)?;
        if candidates.iter().any(|sig| constant_time_eq(&expected, sig)) {
            Ok(())
        } else {
            Err(ServiceError::SignatureVerification(
                "No matching signature".to_string(),
            ))
        }
    }
}

/// Hex HMAC-SHA256 of `{timestamp}.{payload}`.
pub fn compute_signature(
    secret: &str,
    timestamp: &str,
    payload: &[u8],
) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("Invalid HMAC key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a header value the verifier accepts. Used by tests and local tooling.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
    let ts = timestamp.to_string();
    Ok(format!("t={},v1={}", ts, compute_signature(secret, &ts, payload)?))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
