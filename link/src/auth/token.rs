//! Local structural checks on bearer tokens.
//!
//! Tokens are JWTs. Only the shape and the `exp` claim are inspected; the
//! signature is the server's business.

use crate::error::{LinkError, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

/// The subset of JWT claims the hub cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Decode the claims of a JWT without verifying it.
pub fn inspect_token(token: &str) -> Result<TokenClaims> {
    let token = token.trim();
    if token.is_empty() {
        return Err(LinkError::AuthenticationError(
            "Access token is empty".to_string(),
        ));
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(LinkError::AuthenticationError(
            "Access token is not a well-formed JWT".to_string(),
        ));
    }

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| {
            LinkError::AuthenticationError(format!("Access token payload is not base64url: {}", e))
        })?;

    serde_json::from_slice::<TokenClaims>(&payload).map_err(|e| {
        LinkError::AuthenticationError(format!("Access token claims are not valid JSON: {}", e))
    })
}

/// Check that a token is well-formed and not expired at `now_secs`.
pub fn validate_token(token: &str, now_secs: i64) -> Result<TokenClaims> {
    let claims = inspect_token(token)?;
    if let Some(exp) = claims.exp {
        if exp <= now_secs {
            return Err(LinkError::AuthenticationError(format!(
                "Access token expired {}s ago",
                now_secs - exp
            )));
        }
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: &str) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.as_bytes());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_valid_token_returns_claims() {
        let claims = validate_token(&jwt(r#"{"sub":"alice","exp":2000}"#), 1000).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.exp, Some(2000));
    }

    #[test]
    fn test_token_without_expiry_is_valid() {
        assert!(validate_token(&jwt(r#"{"sub":"svc"}"#), 1000).is_ok());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let err = validate_token(&jwt(r#"{"exp":999}"#), 1000).unwrap_err();
        assert!(err.is_auth_failure());
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        assert!(inspect_token("").is_err());
        assert!(inspect_token("opaque-session-id").is_err());
        assert!(inspect_token("a..c").is_err());
        assert!(inspect_token("a.!!!.c").is_err());
        let not_json = general_purpose::URL_SAFE_NO_PAD.encode(b"not json");
        assert!(inspect_token(&format!("a.{}.c", not_json)).is_err());
    }
}
