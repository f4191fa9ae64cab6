use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;

use super::types::UserContext;

#[derive(Debug, Serialize)]
struct TurnClaims {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_id: Option<i64>,
    exp: i64,
}

/// Mint the short-lived backend token for one orchestration turn.
///
/// Encodes the acting user and tenant; expires after `ttl_minutes`. Never
/// cached — every turn gets a fresh token.
pub(super) fn mint_turn_token(
    secret: &str,
    context: &UserContext,
    ttl_minutes: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = TurnClaims {
        sub: context.user_id.to_string(),
        org_id: context.org_id,
        exp: (Utc::now() + Duration::minutes(ttl_minutes)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
