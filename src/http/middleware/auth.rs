//! HMAC signature verification for the deploy trigger
//!
//! The `X-Hub-Signature-256` header carries `sha256=<hex>` (or bare hex) of
//! HMAC-SHA256 over the raw body. The body is read once here, checked, and
//! handed on to the handler unchanged.
//!
//! With no secret configured every request passes. With a secret, a missing
//! or wrong signature is refused when `enforce_signature` is on and only
//! logged when it is off.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use ring::hmac;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::http::{handlers::AppState, responses::ErrorResponse};
use crate::secrets::SecretString;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check `provided` against HMAC-SHA256 of `body` under `secret`
///
/// An empty secret accepts everything. Malformed input is a mismatch.
pub fn verify(secret: &[u8], body: &[u8], provided: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let provided_hex = provided.trim();
    let provided_hex = provided_hex.strip_prefix("sha256=").unwrap_or(provided_hex);

    let provided_bytes = match hex::decode(provided_hex) {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!("Invalid signature format - failed to decode hex");
            return false;
        }
    };

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let expected = hmac::sign(&key, body);

    constant_time_eq(expected.as_ref(), &provided_bytes)
}

/// Generate a signature header value for the given body
#[cfg(test)]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    format!("sha256={}", hex::encode(hmac::sign(&key, body).as_ref()))
}

/// Outcome of checking one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// No secret configured
    Bypassed,
    Verified,
    Missing,
    Invalid,
}

impl SignatureCheck {
    pub fn is_trusted(&self) -> bool {
        matches!(self, SignatureCheck::Bypassed | SignatureCheck::Verified)
    }
}

/// HMAC validator for webhook signature verification
#[derive(Clone)]
pub struct HmacValidator {
    secret: SecretString,
}

impl HmacValidator {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    pub fn check(&self, body: &[u8], signature: Option<&str>) -> SignatureCheck {
        if !self.is_enabled() {
            return SignatureCheck::Bypassed;
        }
        match signature {
            None => SignatureCheck::Missing,
            Some(signature) if verify(self.secret.as_bytes(), body, signature) => {
                SignatureCheck::Verified
            }
            Some(_) => SignatureCheck::Invalid,
        }
    }
}

/// Axum middleware verifying the signature before the deploy handler runs
///
/// Records the [`SignatureCheck`] as a request extension.
pub async fn signature_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let signature = extract_signature_header(request.headers());

    let (mut parts, body) = request.into_parts();
    let idle_timeout = state.idle_timeout();
    let body_bytes = match tokio::time::timeout(idle_timeout, to_bytes(body, state.max_request_bytes))
        .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read request body");
            return body_error(format!("Failed to read request body: {}", e));
        }
        Err(_) => {
            warn!(
                idle_timeout_secs = idle_timeout.as_secs(),
                "Request body did not arrive in time"
            );
            return body_error(format!(
                "Request body not received within {}s",
                idle_timeout.as_secs()
            ));
        }
    };

    let check = state.validator.check(&body_bytes, signature.as_deref());
    match check {
        SignatureCheck::Verified => debug!("HMAC signature validation successful"),
        SignatureCheck::Bypassed => debug!("No webhook secret configured, signature not checked"),
        SignatureCheck::Missing | SignatureCheck::Invalid => {
            warn!(
                check = ?check,
                enforced = state.config.security.enforce_signature,
                "HMAC signature validation failed for deploy request"
            );
            if state.config.security.enforce_signature {
                let body = ErrorResponse::with_message("Invalid signature", "AUTH_ERROR");
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            }
        }
    }

    parts.extensions.insert(check);
    let request = Request::from_parts(parts, Body::from(body_bytes));
    next.run(request).await
}

fn body_error(message: String) -> Response {
    let body = ErrorResponse::with_message(message, "BAD_REQUEST");
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Extract the HMAC signature from request headers
fn extract_signature_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-for-hmac-validation";
    const BODY: &[u8] = br#"{"ref":"refs/heads/main"}"#;

    fn bare_hex(secret: &[u8], body: &[u8]) -> String {
        sign(secret, body).trim_start_matches("sha256=").to_string()
    }

    #[test]
    fn test_prefixed_signature_verifies() {
        assert!(verify(SECRET, BODY, &sign(SECRET, BODY)));
    }

    #[test]
    fn test_bare_hex_signature_verifies() {
        assert!(verify(SECRET, BODY, &bare_hex(SECRET, BODY)));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let expected = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";
        assert!(verify(b"Jefe", b"what do ya want for nothing?", expected));
        assert_eq!(
            sign(b"Jefe", b"what do ya want for nothing?"),
            format!("sha256={}", expected)
        );
    }

    #[test]
    fn test_wrong_signatures_fail() {
        assert!(!verify(SECRET, BODY, &sign(b"other-secret", BODY)));
        assert!(!verify(SECRET, b"tampered", &sign(SECRET, BODY)));
        assert!(!verify(SECRET, BODY, "sha256=not-hex"));
        assert!(!verify(SECRET, BODY, ""));
        assert!(!verify(SECRET, BODY, "sha256="));
        // Truncated digest
        let sig = sign(SECRET, BODY);
        assert!(!verify(SECRET, BODY, &sig[..sig.len() - 2]));
    }

    #[test]
    fn test_empty_secret_accepts_anything() {
        assert!(verify(b"", BODY, "anything"));
        assert!(verify(b"", BODY, ""));
    }

    #[test]
    fn test_validator_outcomes() {
        let validator = HmacValidator::new(SecretString::new("s3cret"));
        assert!(validator.is_enabled());
        assert_eq!(validator.check(BODY, None), SignatureCheck::Missing);
        assert_eq!(
            validator.check(BODY, Some("sha256=00")),
            SignatureCheck::Invalid
        );
        assert_eq!(
            validator.check(BODY, Some(&sign(b"s3cret", BODY))),
            SignatureCheck::Verified
        );

        let open = HmacValidator::new(SecretString::default());
        assert!(!open.is_enabled());
        assert_eq!(open.check(BODY, None), SignatureCheck::Bypassed);
        assert!(open.check(BODY, None).is_trusted());
        assert!(!SignatureCheck::Invalid.is_trusted());
    }
}
