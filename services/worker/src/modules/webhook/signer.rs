use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// signature scheme version prefix on the `webhook-signature` header
static SIGNATURE_VERSION: &str = "v1";

/// deliveries older than this many seconds must be rejected by verifiers to
/// limit replay windows
pub static TIMESTAMP_TOLERANCE_SECONDS: i64 = 5 * 60;

/// Subscription secrets are stored base64 encoded, secrets that fail to
/// decode are keyed by their raw bytes so hand-typed secrets still work
fn key_bytes(secret: &str) -> Vec<u8> {
    STANDARD
        .decode(secret)
        .unwrap_or_else(|_| secret.as_bytes().to_vec())
}

/// Signs a webhook delivery, the signed content is
/// `"{webhook_id}.{timestamp}.{payload}"`
pub fn sign(secret: &str, webhook_id: &str, timestamp: i64, payload: &str) -> String {
    let to_sign = format!("{}.{}.{}", webhook_id, timestamp, payload);

    let mut mac =
        HmacSha256::new_from_slice(&key_bytes(secret)).expect("HMAC can take key of any size");
    mac.update(to_sign.as_bytes());

    format!(
        "{},{}",
        SIGNATURE_VERSION,
        STANDARD.encode(mac.finalize().into_bytes())
    )
}

/// Verifies a webhook delivery signature, recomputing the HMAC and comparing
/// in constant time, deliveries with timestamps outside the tolerance window
/// relative to `now` are rejected regardless of the signature
pub fn verify(
    secret: &str,
    webhook_id: &str,
    timestamp: i64,
    payload: &str,
    signature: &str,
    now: i64,
) -> bool {
    if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECONDS {
        return false;
    }

    let Some(encoded) = signature.strip_prefix(&format!("{},", SIGNATURE_VERSION)) else {
        return false;
    };

    let Ok(expected) = STANDARD.decode(encoded) else {
        return false;
    };

    let to_sign = format!("{}.{}.{}", webhook_id, timestamp, payload);

    let mut mac =
        HmacSha256::new_from_slice(&key_bytes(secret)).expect("HMAC can take key of any size");
    mac.update(to_sign.as_bytes());

    // verify_slice is a constant time comparison
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // known answer from the ecosystem reference implementation of this
    // signature scheme, so receivers using off the shelf verifiers work
    const SECRET: &str = "MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";
    const WEBHOOK_ID: &str = "msg_p5jXN8AQM9LWM0D4loKWxJek";
    const TIMESTAMP: i64 = 1614265330;
    const PAYLOAD: &str = "{\"test\": 2432232314}";

    #[test]
    fn signature_matches_reference_vector() {
        let sig = sign(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD);
        assert_eq!(sig, "v1,g0hM9SsE+OTPJTGt/tmIKtSyZlE3uFJELVlNIOLJ1OE=");
    }

    #[test]
    fn verification_round_trips() {
        let sig = sign(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD);
        assert!(verify(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD, &sig, TIMESTAMP));
    }

    #[test]
    fn verification_fails_on_any_altered_byte() {
        let sig = sign(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD);

        let tampered_payload = "{\"test\": 2432232315}";
        assert!(!verify(
            SECRET,
            WEBHOOK_ID,
            TIMESTAMP,
            tampered_payload,
            &sig,
            TIMESTAMP
        ));

        assert!(!verify(SECRET, "msg_other", TIMESTAMP, PAYLOAD, &sig, TIMESTAMP));
        assert!(!verify(
            "wrong-secret",
            WEBHOOK_ID,
            TIMESTAMP,
            PAYLOAD,
            &sig,
            TIMESTAMP
        ));
    }

    #[test]
    fn verification_rejects_stale_timestamps() {
        let sig = sign(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD);

        let now = TIMESTAMP + TIMESTAMP_TOLERANCE_SECONDS + 1;
        assert!(!verify(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD, &sig, now));

        // skewed into the future beyond tolerance is rejected as well
        let now = TIMESTAMP - TIMESTAMP_TOLERANCE_SECONDS - 1;
        assert!(!verify(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD, &sig, now));
    }

    #[test]
    fn verification_rejects_unknown_scheme_versions() {
        let sig = sign(SECRET, WEBHOOK_ID, TIMESTAMP, PAYLOAD);
        let unversioned = sig.replace("v1,", "v2,");
        assert!(!verify(
            SECRET,
            WEBHOOK_ID,
            TIMESTAMP,
            PAYLOAD,
            &unversioned,
            TIMESTAMP
        ));
    }
}
