//! Webhook signature verification.
//!
//! The gateway signs each delivery with HMAC-SHA256 over
//! `"{timestamp}.{raw body}"` and sends `t=<unix>,v1=<hex>` in the signature
//! header. Verification happens before any parsing or state access; an
//! unverifiable event must never reach business logic.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification failures. All of them are security events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature header missing")]
    MissingHeader,

    #[error("Signature header malformed")]
    Malformed,

    #[error("Signed timestamp outside tolerance ({age_secs}s old)")]
    TimestampOutOfTolerance { age_secs: i64 },

    #[error("Signature does not match payload")]
    Mismatch,
}

/// Verify a webhook delivery against the shared secret.
///
/// `tolerance_secs` bounds how old the signed timestamp may be (replay
/// protection); a small negative age is tolerated for clock skew. Multiple
/// `v1` entries are accepted, any one match passes (secret rotation).
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let (timestamp, candidates) = parse_header(header)?;

    let age_secs = now_unix - timestamp;
    if age_secs > tolerance_secs || age_secs < -tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance { age_secs });
    }

    let mut signed_payload = Vec::with_capacity(payload.len() + 12);
    signed_payload.extend_from_slice(timestamp.to_string().as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(payload);

    for candidate in candidates {
        let Ok(expected) = hex::decode(&candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(&signed_payload);
        // verify_slice is constant-time
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

fn parse_header(header: &str) -> Result<(i64, Vec<String>), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => candidates.push(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, candidates.is_empty()) {
        (Some(t), false) => Ok((t, candidates)),
        _ => Err(SignatureError::Malformed),
    }
}

/// Produce a signature header for a payload. Used by tests and the local
/// webhook replay tool; the real gateway signs on its side.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const TOLERANCE: i64 = 300;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"event_type":"payment.confirmed"}"#;
        let header = sign_payload(payload, SECRET, now());
        assert_eq!(
            verify_signature(payload, &header, SECRET, TOLERANCE, now()),
            Ok(())
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"event_type":"payment.confirmed"}"#;
        let header = sign_payload(payload, "wrong_secret", now());
        assert_eq!(
            verify_signature(payload, &header, SECRET, TOLERANCE, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_modified_payload_rejected() {
        let payload = br#"{"event_type":"payment.confirmed"}"#;
        let header = sign_payload(payload, SECRET, now());
        let tampered = br#"{"event_type":"payment.confirmed","admin":true}"#;
        assert_eq!(
            verify_signature(tampered, &header, SECRET, TOLERANCE, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_old_timestamp_rejected() {
        let payload = b"{}";
        let stale = now() - 600;
        let header = sign_payload(payload, SECRET, stale);
        assert!(matches!(
            verify_signature(payload, &header, SECRET, TOLERANCE, now()),
            Err(SignatureError::TimestampOutOfTolerance { .. })
        ));
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let payload = b"{}";
        for header in ["", "t=123", "v1=abcd", "nonsense", "t=abc,v1=ff"] {
            assert_eq!(
                verify_signature(payload, header, SECRET, TOLERANCE, now()),
                Err(SignatureError::Malformed),
                "header {header:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_second_v1_entry_accepted() {
        // Secret rotation: old signature first, current one second
        let payload = b"{}";
        let ts = now();
        let good = sign_payload(payload, SECRET, ts);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={ts},v1={},v1={good_sig}", "0".repeat(64));
        assert_eq!(
            verify_signature(payload, &header, SECRET, TOLERANCE, now()),
            Ok(())
        );
    }
}
