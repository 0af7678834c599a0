//! Webhook signature verification
//!
//! The provider signs `"{timestamp}.{raw_body}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. Verification runs
//! before any event is decoded or applied.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Signature verification errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,

    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("Signature timestamp {timestamp} outside tolerance (now {now})")]
    OutsideTolerance { timestamp: i64, now: i64 },

    #[error("No signature matches the payload")]
    Mismatch,

    #[error("Webhook secret is not usable")]
    InvalidSecret,
}

/// Verifies signed webhook envelopes
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify `payload` against the signature header at the current time
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::MissingHeader)?;
        let (timestamp, signatures) = parse_header(header)?;

        // abs_diff cannot overflow for extreme header timestamps
        if now.abs_diff(timestamp) > self.tolerance_secs.max(0).unsigned_abs() {
            return Err(SignatureError::OutsideTolerance { timestamp, now });
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a header value for `payload`, as the provider would
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or_else(|| SignatureError::MalformedHeader(part.to_string()))?;

        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    SignatureError::MalformedHeader(format!("bad timestamp: {}", value))
                })?)
            }
            "v1" => signatures.push(value),
            // v0 and future schemes are not trusted
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::MalformedHeader("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader("no v1 signature".to_string()));
    }

    Ok((timestamp, signatures))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_717_243_200;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", 300)
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = verifier().sign(payload, NOW).unwrap();
        assert_eq!(verifier().verify_at(payload, Some(&header), NOW + 10), Ok(()));
    }

    #[test]
    fn test_any_v1_may_match() {
        let payload = br#"{"id":"evt_1"}"#;
        let good = verifier().sign(payload, NOW).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good_sig);

        assert_eq!(verifier().verify_at(payload, Some(&header), NOW), Ok(()));
    }

    #[test]
    fn test_tampered_payload() {
        let header = verifier().sign(br#"{"id":"evt_1"}"#, NOW).unwrap();
        assert_eq!(
            verifier().verify_at(br#"{"id":"evt_2"}"#, Some(&header), NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let payload = b"{}";
        let header = WebhookVerifier::new("other", 300).sign(payload, NOW).unwrap();
        assert_eq!(
            verifier().verify_at(payload, Some(&header), NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp() {
        let payload = b"{}";
        let header = verifier().sign(payload, NOW - 301).unwrap();
        assert!(matches!(
            verifier().verify_at(payload, Some(&header), NOW),
            Err(SignatureError::OutsideTolerance { .. })
        ));
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        for timestamp in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1={}", timestamp, "00".repeat(32));
            assert_eq!(
                verifier().verify_at(payload, Some(&header), NOW),
                Err(SignatureError::OutsideTolerance { timestamp, now: NOW })
            );
        }
    }

    #[test]
    fn test_missing_and_malformed_headers() {
        assert_eq!(verifier().verify_at(b"{}", None, NOW), Err(SignatureError::MissingHeader));
        assert!(matches!(
            verifier().verify_at(b"{}", Some("garbage"), NOW),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            verifier().verify_at(b"{}", Some(&format!("t={}", NOW)), NOW),
            Err(SignatureError::MalformedHeader(_))
        ));
    }
}
