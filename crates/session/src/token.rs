//! Session token decoding.
//!
//! The dashboard API issues a JWT on login. The client never verifies the
//! signature: the API is the authority on validity, and the client only
//! needs the claims to render user details and drive local navigation. What
//! the client does enforce is the claim *shape*. A token that does not carry
//! exactly the expected claims is treated the same as no token at all.
//!
//! # Example
//!
//! ```no_run
//! use dashboard_client_session::token::decode;
//!
//! # fn example(raw: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let claims = decode(raw)?;
//! println!("signed in as {} ({})", claims.username, claims.email);
//! # Ok(())
//! # }
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, TokenError};

/// Claims carried by a dashboard session token.
///
/// Expected payload:
///
/// ```json
/// {
///   "unique_id": "usr_01HXYZ",
///   "email": "ada@example.com",
///   "username": "ada",
///   "role": "owner",
///   "organization_id": "org_01HXYZ",
///   "name": "Ada Lovelace",
///   "exp": 1893456000
/// }
/// ```
///
/// `role` must be present but may be `null`; `organization_id` and `exp` may
/// be omitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    /// Stable identifier of the signed-in user.
    #[serde(rename = "unique_id")]
    pub subject_id: String,
    /// Email address of the user.
    pub email: String,
    /// Login name of the user.
    pub username: String,
    /// Permission level within the current organization.
    pub role: Option<String>,
    /// Organization the session is scoped to, if one has been selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Display name of the user.
    pub name: String,
    /// Expiration time (seconds since epoch), if the issuer set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl TokenClaims {
    /// Returns `true` when the token carries an `exp` at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.exp.is_some_and(|exp| exp <= now)
    }
}

/// Decodes a raw session token into its claims.
///
/// This is structural decoding only; no signature is checked.
///
/// # Errors
///
/// Returns an error if:
/// - The token does not have exactly 3 dot-separated parts
/// - The header is not a valid JWT header
/// - The payload is not base64url-encoded JSON object
/// - A required claim is missing, `null`, empty, or of the wrong type
pub fn decode(raw: &str) -> Result<TokenClaims> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TokenError::invalid_format("token is empty"));
    }

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::invalid_format("JWT must have 3 parts separated by dots"));
    }

    jsonwebtoken::decode_header(raw)
        .map_err(|e| TokenError::invalid_format(format!("Failed to decode JWT header: {e}")))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| TokenError::invalid_format(format!("Failed to decode JWT payload: {e}")))?;

    let payload: Value = serde_json::from_slice(&payload_bytes)
        .map_err(|e| TokenError::invalid_format(format!("Failed to parse JWT claims: {e}")))?;
    let Value::Object(payload) = payload else {
        return Err(TokenError::invalid_format("JWT claims must be a JSON object"));
    };

    let subject_id = required_string(&payload, "unique_id")?;
    if subject_id.is_empty() {
        return Err(TokenError::missing_claim("unique_id"));
    }

    if !payload.contains_key("role") {
        return Err(TokenError::missing_claim("role"));
    }

    Ok(TokenClaims {
        subject_id,
        email: required_string(&payload, "email")?,
        username: required_string(&payload, "username")?,
        role: optional_string(&payload, "role")?,
        organization_id: optional_string(&payload, "organization_id")?,
        name: required_string(&payload, "name")?,
        exp: optional_timestamp(&payload, "exp")?,
    })
}

/// Rejects claims whose `exp` is at or before `now` (seconds since epoch).
///
/// # Errors
///
/// Returns [`TokenError::Expired`] for an expired token.
pub fn validate_expiry(claims: &TokenClaims, now: u64) -> Result<()> {
    if claims.is_expired_at(now) { Err(TokenError::Expired) } else { Ok(()) }
}

/// Decodes a token and, when `reject_expired` is set, checks `exp` against
/// `now` (seconds since epoch).
///
/// # Errors
///
/// Returns any error from [`decode`], or [`TokenError::Expired`].
pub fn decode_with(raw: &str, now: u64, reject_expired: bool) -> Result<TokenClaims> {
    let claims = decode(raw)?;
    if reject_expired {
        validate_expiry(&claims, now)?;
    }
    Ok(claims)
}

/// [`decode_with`] against the current wall clock.
///
/// # Errors
///
/// Returns any error from [`decode`], or [`TokenError::Expired`].
pub fn decode_validated(raw: &str, reject_expired: bool) -> Result<TokenClaims> {
    decode_with(raw, current_timestamp(), reject_expired)
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn required_string(payload: &Map<String, Value>, claim: &str) -> Result<String> {
    match payload.get(claim) {
        None | Some(Value::Null) => Err(TokenError::missing_claim(claim)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(TokenError::invalid_claim(claim, type_mismatch("string", other))),
    }
}

fn optional_string(payload: &Map<String, Value>, claim: &str) -> Result<Option<String>> {
    match payload.get(claim) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TokenError::invalid_claim(claim, type_mismatch("string", other))),
    }
}

fn optional_timestamp(payload: &Map<String, Value>, claim: &str) -> Result<Option<u64>> {
    match payload.get(claim) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| TokenError::invalid_claim(claim, "expected a non-negative integer")),
        Some(other) => Err(TokenError::invalid_claim(claim, type_mismatch("number", other))),
    }
}

fn type_mismatch(expected: &str, value: &Value) -> String {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected {expected}, found {found}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::testutil::{craft_raw_token, encode_test_token, test_claims};

    fn payload_without(claim: &str) -> Value {
        let mut payload = serde_json::to_value(test_claims()).unwrap();
        payload.as_object_mut().unwrap().remove(claim);
        payload
    }

    #[test]
    fn test_decode_well_formed_token() {
        let claims = test_claims();
        let token = encode_test_token(&claims);

        assert_eq!(decode(&token).unwrap(), claims);
    }

    #[test]
    fn test_decode_tolerates_padded_payload() {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let token = craft_raw_token(&header, &serde_json::to_value(test_claims()).unwrap());
        let mut parts: Vec<String> = token.split('.').map(str::to_owned).collect();
        while parts[1].len() % 4 != 0 {
            parts[1].push('=');
        }

        assert_eq!(decode(&parts.join(".")).unwrap(), test_claims());
    }

    #[test]
    fn test_decode_null_role_and_missing_organization() {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let payload = json!({
            "unique_id": "usr_1",
            "email": "ada@example.com",
            "username": "ada",
            "role": null,
            "name": "Ada",
        });

        let claims = decode(&craft_raw_token(&header, &payload)).unwrap();
        assert_eq!(claims.role, None);
        assert_eq!(claims.organization_id, None);
        assert_eq!(claims.exp, None);
    }

    #[rstest]
    #[case("unique_id")]
    #[case("email")]
    #[case("username")]
    #[case("role")]
    #[case("name")]
    fn test_decode_rejects_missing_required_claim(#[case] claim: &str) {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let token = craft_raw_token(&header, &payload_without(claim));

        assert_eq!(decode(&token), Err(TokenError::missing_claim(claim)));
    }

    #[rstest]
    #[case("email", json!(42))]
    #[case("username", json!(["ada"]))]
    #[case("role", json!(true))]
    #[case("organization_id", json!({"id": 1}))]
    #[case("exp", json!("tomorrow"))]
    fn test_decode_rejects_mistyped_claim(#[case] claim: &str, #[case] value: Value) {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let mut payload = serde_json::to_value(test_claims()).unwrap();
        payload[claim] = value;

        let err = decode(&craft_raw_token(&header, &payload)).unwrap_err();
        assert!(matches!(err, TokenError::InvalidClaim { claim: ref c, .. } if c == claim));
    }

    #[test]
    fn test_decode_rejects_empty_subject() {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let mut payload = serde_json::to_value(test_claims()).unwrap();
        payload["unique_id"] = json!("");

        assert_eq!(
            decode(&craft_raw_token(&header, &payload)),
            Err(TokenError::missing_claim("unique_id"))
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("only.two")]
    #[case("too.many.parts.here")]
    #[case("not.a.jwt")]
    fn test_decode_rejects_malformed_structure(#[case] raw: &str) {
        assert!(matches!(decode(raw), Err(TokenError::InvalidFormat(_))));
    }

    #[test]
    fn test_decode_rejects_non_object_payload() {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let token = craft_raw_token(&header, &json!(["not", "an", "object"]));

        assert!(matches!(decode(&token), Err(TokenError::InvalidFormat(_))));
    }

    #[test]
    fn test_validate_expiry() {
        let mut claims = test_claims();
        claims.exp = Some(1_000);

        assert_eq!(validate_expiry(&claims, 999), Ok(()));
        assert_eq!(validate_expiry(&claims, 1_000), Err(TokenError::Expired));

        claims.exp = None;
        assert_eq!(validate_expiry(&claims, u64::MAX), Ok(()));
    }

    #[test]
    fn test_decode_validated_honours_flag() {
        let mut claims = test_claims();
        claims.exp = Some(1);
        let token = encode_test_token(&claims);

        assert!(decode_validated(&token, false).is_ok());
        assert_eq!(decode_validated(&token, true), Err(TokenError::Expired));
    }

    #[test]
    fn test_decode_with_uses_supplied_clock() {
        let mut claims = test_claims();
        claims.exp = Some(2_000);
        let token = encode_test_token(&claims);

        assert_eq!(decode_with(&token, 1_999, true), Ok(claims));
        assert_eq!(decode_with(&token, 2_000, true), Err(TokenError::Expired));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_claims() -> impl Strategy<Value = TokenClaims> {
            (
                "[a-zA-Z0-9_-]{1,32}",
                "[a-z0-9.]{1,16}@[a-z]{1,12}\\.com",
                "[a-zA-Z0-9_]{1,24}",
                proptest::option::of("owner|admin|member"),
                proptest::option::of("[a-zA-Z0-9_-]{1,32}"),
                "[a-zA-Z ]{0,40}",
                proptest::option::of(1_000_000_000u64..4_000_000_000u64),
            )
                .prop_map(|(subject_id, email, username, role, organization_id, name, exp)| {
                    TokenClaims { subject_id, email, username, role, organization_id, name, exp }
                })
        }

        proptest! {
            /// Any well-formed token decodes to exactly the claims it was built from.
            #[test]
            fn decode_recovers_encoded_claims(claims in arb_claims()) {
                let token = encode_test_token(&claims);
                prop_assert_eq!(decode(&token).expect("well-formed token"), claims);
            }

            /// Arbitrary text never panics the decoder.
            #[test]
            fn decode_never_panics(raw in ".{0,256}") {
                let _ = decode(&raw);
            }
        }
    }
}
