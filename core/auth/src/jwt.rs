//! Access-token claim extraction.
//!
//! The identity server signs its tokens; this module only reads claims the
//! client needs for bookkeeping (subject, email, name). Signature
//! verification is the resource server's job, not ours, so none happens
//! here and nothing security-relevant may be decided from these claims.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use keyfort_common::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: the user id.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Decode the claims from a compact JWT without verifying its signature.
///
/// # Errors
/// - `Protocol` when the token is not three dot-separated parts
/// - `Serialization` when the payload is not valid base64url JSON
pub fn decode_claims(token: &str) -> Result<AccessTokenClaims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Protocol("malformed access token".to_string()));
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::Serialization(format!("access token payload: {e}")))?;
    serde_json::from_slice(&decoded)
        .map_err(|e| Error::Serialization(format!("access token claims: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(payload: &str) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode("sig")
        )
    }

    #[test]
    fn test_decode_claims() {
        let token = make_token(r#"{"sub":"user-1","email":"u@example.com","name":"U"}"#);
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("u@example.com"));
    }

    #[test]
    fn test_optional_claims_absent() {
        let token = make_token(r#"{"sub":"user-2"}"#);
        let claims = decode_claims(&token).unwrap();
        assert!(claims.email.is_none());
        assert!(claims.name.is_none());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(decode_claims("not-a-jwt").is_err());
        assert!(decode_claims("a.b").is_err());
        assert!(decode_claims("a.b.c.d").is_err());
        assert!(decode_claims("a.!!!.c").is_err());
    }
}
