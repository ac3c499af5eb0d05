//! Operator authentication.
//!
//! Back-office tokens are `<id>.<username>.<sig>` where `sig` is the hex
//! HMAC-SHA256 of `<id>.<username>` under the shared secret. The extractor
//! rejects bad or missing tokens with 401 before a handler runs; the webhook
//! uses its own shared-secret header and never carries an operator identity.

use crate::domain::AuditActor;
use crate::error::AppError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// The per-request secrets the extractor needs, pulled out of the app state.
#[derive(Clone)]
pub struct AuthKeys {
    pub jwt_secret: String,
    pub webhook_secret: String,
}

fn signature(message: &str, secret: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    mac
}

/// Issue a token for an operator. Used by the login flow and by tests.
pub fn sign_token(actor: &AuditActor, secret: &str) -> String {
    let message = format!("{}.{}", actor.id, actor.username);
    let sig = hex::encode(signature(&message, secret).finalize().into_bytes());
    format!("{message}.{sig}")
}

/// Parse and verify a token, returning the embedded actor.
pub fn verify_token(token: &str, secret: &str) -> Result<AuditActor, AppError> {
    let unauthorized = || AppError::Unauthorized("Invalid token".to_string());

    // username may itself contain dots; the signature is always the last
    // segment and the id the first.
    let (message, sig_hex) = token.rsplit_once('.').ok_or_else(unauthorized)?;
    let (id_part, username) = message.split_once('.').ok_or_else(unauthorized)?;
    if username.is_empty() {
        return Err(unauthorized());
    }
    let id = Uuid::parse_str(id_part).map_err(|_| unauthorized())?;

    let sig = hex::decode(sig_hex).map_err(|_| unauthorized())?;
    signature(message, secret)
        .verify_slice(&sig)
        .map_err(|_| unauthorized())?;

    Ok(AuditActor::new(id, username))
}

/// Extractor for authenticated operator routes.
pub struct AuthActor(pub AuditActor);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthActor
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Expected bearer token".to_string()))?;

        let actor = verify_token(token, &keys.jwt_secret)?;
        Ok(AuthActor(actor))
    }
}

/// Check the webhook shared-secret header.
pub fn verify_webhook_secret(
    headers: &axum::http::HeaderMap,
    expected: &str,
) -> Result<(), AppError> {
    let provided = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing webhook secret".to_string()))?;

    // Compare HMACs of both values so the comparison leaks no prefix length.
    let a = signature(provided, "cmp").finalize().into_bytes();
    let b = signature(expected, "cmp").finalize().into_bytes();
    if a == b {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Invalid webhook secret".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let actor = AuditActor::new(Uuid::new_v4(), "ops.lead");
        let token = sign_token(&actor, "secret");
        let parsed = verify_token(&token, "secret").unwrap();
        assert_eq!(parsed.id, actor.id);
        assert_eq!(parsed.username, actor.username);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let actor = AuditActor::new(Uuid::new_v4(), "ops");
        let token = sign_token(&actor, "secret");
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn test_tampered_username_rejected() {
        let actor = AuditActor::new(Uuid::new_v4(), "ops");
        let token = sign_token(&actor, "secret");
        let forged = token.replacen("ops", "admin", 1);
        assert!(verify_token(&forged, "secret").is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_token("not-a-token", "secret").is_err());
        assert!(verify_token("a.b", "secret").is_err());
        assert!(verify_token("", "secret").is_err());
    }

    #[test]
    fn test_webhook_secret_match() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-webhook-secret", "hook-secret".parse().unwrap());
        assert!(verify_webhook_secret(&headers, "hook-secret").is_ok());
        assert!(verify_webhook_secret(&headers, "other").is_err());
    }

    #[test]
    fn test_webhook_secret_missing() {
        let headers = axum::http::HeaderMap::new();
        assert!(verify_webhook_secret(&headers, "hook-secret").is_err());
    }
}
