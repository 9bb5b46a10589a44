//! Bearer token decoding.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload is
//! read, and the signature is not verified: the client needs the expiry and
//! role to schedule renewal, while the backend stays the authority on
//! whether a token is accepted.

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use thiserror::Error;

/// Tokens whose expiry is further than this from "now" are treated as
/// corrupt or clock-skewed.
pub const EXPIRY_SANITY_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Default buffer applied by [`is_expired`].
pub const DEFAULT_GRACE_MS: i64 = 60_000;

/// Latest accepted `exp` claim: 9999-12-31T23:59:59Z.
pub const MAX_EXPIRY_UNIX_SECS: i64 = 253_402_300_799;

/// Role id the backend assigns to administrators.
pub const ADMIN_ROLE_ID: i64 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is empty")]
    Empty,

    #[error("expected 3 segments, found {0}")]
    Malformed(usize),

    #[error("payload is not base64url: {0}")]
    Base64(String),

    #[error("payload is not a JSON object: {0}")]
    Json(String),

    #[error("payload has no numeric exp claim")]
    MissingExpiry,

    #[error("exp claim {0} is out of range")]
    ExpiryOutOfRange(i64),
}

/// Role embedded in the token. Either field may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleClaim {
    pub id: Option<i64>,
    pub name: Option<String>,
}

/// Claims the client cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub expires_at_unix_secs: i64,
    pub role: Option<RoleClaim>,
}

impl TokenClaims {
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_unix_secs.saturating_mul(1000)
    }
}

/// Decode a token's expiry and role claim.
pub fn decode(token: &str) -> Result<TokenClaims, DecodeError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(DecodeError::Malformed(parts.len()));
    }

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let claims: Value =
        serde_json::from_slice(&payload).map_err(|e| DecodeError::Json(e.to_string()))?;
    let claims = claims
        .as_object()
        .ok_or_else(|| DecodeError::Json("payload is not an object".to_string()))?;

    let expires_at_unix_secs = match claims.get("exp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .ok_or(DecodeError::MissingExpiry)?,
        _ => return Err(DecodeError::MissingExpiry),
    };
    if !(0..=MAX_EXPIRY_UNIX_SECS).contains(&expires_at_unix_secs) {
        return Err(DecodeError::ExpiryOutOfRange(expires_at_unix_secs));
    }

    Ok(TokenClaims {
        expires_at_unix_secs,
        role: claims.get("role").and_then(parse_role),
    })
}

/// Accepts `{ "id": .., "name": .. }`, a bare name, or a bare id.
fn parse_role(value: &Value) -> Option<RoleClaim> {
    match value {
        Value::Object(fields) => {
            let id = fields.get("id").and_then(|id| match id {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            });
            let name = fields
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            if id.is_none() && name.is_none() {
                None
            } else {
                Some(RoleClaim { id, name })
            }
        }
        Value::String(name) => Some(RoleClaim {
            id: None,
            name: Some(name.clone()),
        }),
        Value::Number(n) => n.as_i64().map(|id| RoleClaim {
            id: Some(id),
            name: None,
        }),
        _ => None,
    }
}

/// A role is administrative when its name mentions "admin" or its id is the
/// administrator id.
pub fn is_admin(role: Option<&RoleClaim>) -> bool {
    let Some(role) = role else {
        return false;
    };
    let by_name = role
        .name
        .as_deref()
        .is_some_and(|name| name.to_lowercase().contains("admin"));
    by_name || role.id == Some(ADMIN_ROLE_ID)
}

/// Pessimistic expiry check.
///
/// True when the token cannot be decoded, when its expiry lies outside the
/// sanity window around `now_ms`, or when `now_ms + grace_ms` has reached
/// the expiry.
pub fn is_expired(token: &str, grace_ms: i64, now_ms: i64) -> bool {
    let Ok(claims) = decode(token) else {
        return true;
    };
    let expires_at_ms = claims.expires_at_ms();
    let distance_ms = expires_at_ms.saturating_sub(now_ms).unsigned_abs();
    if distance_ms > EXPIRY_SANITY_WINDOW_MS.unsigned_abs() {
        return true;
    }
    now_ms.saturating_add(grace_ms) >= expires_at_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_with(payload: Value) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_decode_claims() {
        let token = token_with(json!({"exp": 1_700_000_000, "role": {"id": 2, "name": "User"}}));

        let claims = decode(&token).unwrap();
        assert_eq!(claims.expires_at_unix_secs, 1_700_000_000);
        assert_eq!(claims.expires_at_ms(), 1_700_000_000_000);
        assert_eq!(
            claims.role,
            Some(RoleClaim {
                id: Some(2),
                name: Some("User".to_string())
            })
        );
    }

    #[test]
    fn test_decode_tolerates_padding_and_fractional_exp() {
        let header = general_purpose::URL_SAFE.encode(b"{}");
        let body = general_purpose::URL_SAFE.encode(br#"{"exp":1700000000.75}"#);
        let token = format!("{}.{}.sig", header, body);

        assert_eq!(decode(&token).unwrap().expires_at_unix_secs, 1_700_000_000);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(""), Err(DecodeError::Empty));
        assert_eq!(decode("   "), Err(DecodeError::Empty));
        assert_eq!(decode("a.b"), Err(DecodeError::Malformed(2)));
        assert!(matches!(decode("a.!!!.c"), Err(DecodeError::Base64(_))));

        let not_json = format!("h.{}.s", general_purpose::URL_SAFE_NO_PAD.encode("nope"));
        assert!(matches!(decode(&not_json), Err(DecodeError::Json(_))));

        let array = token_with(json!([1, 2, 3]));
        assert!(matches!(decode(&array), Err(DecodeError::Json(_))));

        let no_exp = token_with(json!({"sub": "42"}));
        assert_eq!(decode(&no_exp), Err(DecodeError::MissingExpiry));

        let string_exp = token_with(json!({"exp": "1700000000"}));
        assert_eq!(decode(&string_exp), Err(DecodeError::MissingExpiry));
    }

    #[test]
    fn test_decode_rejects_out_of_range_expiry() {
        let huge_negative = token_with(json!({"exp": -9_223_372_036_854_775_i64}));
        assert_eq!(
            decode(&huge_negative),
            Err(DecodeError::ExpiryOutOfRange(-9_223_372_036_854_775))
        );

        let far_future = token_with(json!({"exp": i64::MAX}));
        assert!(matches!(
            decode(&far_future),
            Err(DecodeError::ExpiryOutOfRange(_))
        ));

        let float_overflow = token_with(json!({"exp": 1e300}));
        assert!(matches!(
            decode(&float_overflow),
            Err(DecodeError::ExpiryOutOfRange(_))
        ));

        let latest = token_with(json!({"exp": MAX_EXPIRY_UNIX_SECS}));
        assert!(decode(&latest).is_ok());
    }

    #[test]
    fn test_is_expired_never_overflows() {
        let now = 1_700_000_000_000_i64;
        let huge_negative = token_with(json!({"exp": -9_223_372_036_854_775_i64}));

        assert!(is_expired(&huge_negative, DEFAULT_GRACE_MS, now));
        assert!(is_expired(&token_with(json!({"exp": 1})), DEFAULT_GRACE_MS, i64::MIN));
        assert!(is_expired(&token_with(json!({"exp": 1})), i64::MAX, i64::MAX));
    }

    #[test]
    fn test_role_claim_shapes() {
        let named = decode(&token_with(json!({"exp": 1, "role": "Admin"}))).unwrap();
        assert_eq!(named.role.unwrap().name.as_deref(), Some("Admin"));

        let numeric = decode(&token_with(json!({"exp": 1, "role": 1}))).unwrap();
        assert_eq!(numeric.role.unwrap().id, Some(1));

        let missing = decode(&token_with(json!({"exp": 1}))).unwrap();
        assert_eq!(missing.role, None);

        let empty = decode(&token_with(json!({"exp": 1, "role": {}}))).unwrap();
        assert_eq!(empty.role, None);
    }

    #[test]
    fn test_is_admin() {
        let role = |id: Option<i64>, name: Option<&str>| RoleClaim {
            id,
            name: name.map(str::to_string),
        };

        assert!(is_admin(Some(&role(Some(5), Some("Super-ADMIN")))));
        assert!(is_admin(Some(&role(None, Some("administrator")))));
        assert!(is_admin(Some(&role(Some(1), None))));
        assert!(!is_admin(Some(&role(Some(2), Some("user")))));
        assert!(!is_admin(None));
    }

    #[test]
    fn test_admin_by_id_despite_non_admin_name() {
        let token = token_with(json!({"exp": 1, "role": {"id": 1, "name": "manager"}}));
        let claims = decode(&token).unwrap();
        assert!(is_admin(claims.role.as_ref()));
    }

    #[test]
    fn test_is_expired_grace_boundary() {
        let now = 1_700_000_000_000_i64;
        let exp_secs = now / 1000 + 600;
        let token = token_with(json!({"exp": exp_secs}));
        let expiry = exp_secs * 1000;
        let grace = DEFAULT_GRACE_MS;

        assert!(!is_expired(&token, grace, expiry - grace - 1));
        assert!(is_expired(&token, grace, expiry - grace));
        assert!(is_expired(&token, grace, expiry - grace + 1));
        assert!(is_expired(&token, grace, expiry));

        assert!(!is_expired(&token, 0, expiry - 1));
        assert!(is_expired(&token, 0, expiry));
    }

    #[test]
    fn test_is_expired_outside_sanity_window() {
        let now = 1_700_000_000_000_i64;
        let far_future = token_with(json!({"exp": now / 1000 + 25 * 3600}));
        let far_past = token_with(json!({"exp": now / 1000 - 25 * 3600}));

        assert!(is_expired(&far_future, DEFAULT_GRACE_MS, now));
        assert!(is_expired(&far_past, DEFAULT_GRACE_MS, now));
    }

    #[test]
    fn test_is_expired_undecodable() {
        assert!(is_expired("garbage", DEFAULT_GRACE_MS, 0));
    }
}
