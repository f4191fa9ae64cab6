//! Webhook handshake and signature verification for the ingress receiver.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why a subscription handshake was rejected; maps to the HTTP status the
/// gateway should answer with.
#[derive(Debug, PartialEq, Eq)]
pub enum SubscriptionRejection {
    /// `hub.mode` or `hub.verify_token` absent from the query.
    MissingParams,
    /// Wrong mode, wrong token, or no challenge to echo.
    Mismatch,
}

/// Verify the webhook subscription handshake.
///
/// Returns the challenge to echo back as plain text when the mode is
/// `subscribe` and the token matches the configured verify token.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: Option<&str>,
) -> Result<String, SubscriptionRejection> {
    let (Some(mode), Some(token)) = (mode, token) else {
        return Err(SubscriptionRejection::MissingParams);
    };
    match (expected_token, challenge) {
        (Some(expected), Some(challenge)) if mode == "subscribe" && token == expected => {
            Ok(challenge.to_string())
        }
        _ => Err(SubscriptionRejection::Mismatch),
    }
}

/// Validate the `X-Hub-Signature-256` header against the raw request body.
///
/// The header carries `sha256=<hex hmac>`; the comparison runs in constant
/// time. With no app secret configured the check is skipped.
pub fn validate_signature(raw_body: &[u8], header: Option<&str>, app_secret: Option<&str>) -> bool {
    let Some(secret) = app_secret.filter(|value| !value.trim().is_empty()) else {
        return true;
    };
    let Some(provided) = header.and_then(|value| value.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = sign(body, "app-secret");
        assert!(validate_signature(body, Some(&header), Some("app-secret")));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(b"original", "app-secret");
        assert!(!validate_signature(b"tampered", Some(&header), Some("app-secret")));
    }

    #[test]
    fn rejects_missing_header_when_secret_configured() {
        assert!(!validate_signature(b"body", None, Some("app-secret")));
    }

    #[test]
    fn skips_check_without_secret() {
        assert!(validate_signature(b"body", None, None));
    }

    #[test]
    fn subscription_echoes_challenge() {
        let result = verify_subscription(
            Some("subscribe"),
            Some("verify-me"),
            Some("12345"),
            Some("verify-me"),
        );
        assert_eq!(result, Ok("12345".to_string()));
    }

    #[test]
    fn subscription_rejects_wrong_token() {
        let result = verify_subscription(
            Some("subscribe"),
            Some("wrong"),
            Some("12345"),
            Some("verify-me"),
        );
        assert_eq!(result, Err(SubscriptionRejection::Mismatch));
    }

    #[test]
    fn subscription_requires_mode_and_token() {
        let result = verify_subscription(None, Some("verify-me"), Some("1"), Some("verify-me"));
        assert_eq!(result, Err(SubscriptionRejection::MissingParams));
    }
}
