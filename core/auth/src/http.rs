//! Reqwest-backed identity client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use keyfort_common::{Error, Result};
use keyfort_crypto::KdfConfig;

use crate::api::{
    CaptchaChallenge, IdentityClient, IdentityResponse, TokenRequest, TokenResponse,
    TwoFactorChallenge,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to a real identity endpoint over HTTPS.
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    /// # Errors
    /// - `Http` if the underlying client cannot be constructed
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("client build: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn prelogin(&self, email: &str) -> Result<KdfConfig> {
        let url = format!("{}/accounts/prelogin", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("prelogin: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "prelogin failed with status {}",
                response.status()
            )));
        }
        response
            .json::<KdfConfig>()
            .await
            .map_err(|e| Error::Serialization(format!("prelogin response: {e}")))
    }

    async fn request_token(&self, request: &TokenRequest) -> Result<IdentityResponse> {
        let url = format!("{}/connect/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&request.form_fields())
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("token response body: {e}")))?;

        if status.is_success() {
            let token: TokenResponse = serde_json::from_str(&body)
                .map_err(|e| Error::Serialization(format!("token response: {e}")))?;
            return Ok(IdentityResponse::Authenticated(Box::new(token)));
        }

        debug!(%status, "token endpoint returned a non-success status");
        parse_challenge(&body).ok_or_else(|| {
            let description = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("errorDescription")
                        .or_else(|| v.get("error_description"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("status {status}"));
            Error::Authentication(description)
        })
    }
}

// A 400 from the token endpoint is a challenge when the body carries the
// challenge fields, an authentication failure otherwise.
fn parse_challenge(body: &str) -> Option<IdentityResponse> {
    let value: Value = serde_json::from_str(body).ok()?;
    if value.get("twoFactorProviders").is_some() {
        let challenge: TwoFactorChallenge = serde_json::from_value(value).ok()?;
        return Some(IdentityResponse::TwoFactorRequired(challenge));
    }
    if value.get("siteKey").is_some() {
        let challenge: CaptchaChallenge = serde_json::from_value(value).ok()?;
        return Some(IdentityResponse::CaptchaRequired(challenge));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_factor_challenge_body() {
        let body = r#"{"twoFactorProviders":[0],"twoFactorMetadata":{}}"#;
        assert!(matches!(
            parse_challenge(body),
            Some(IdentityResponse::TwoFactorRequired(_))
        ));
    }

    #[test]
    fn test_parse_captcha_challenge_body() {
        let body = r#"{"siteKey":"site-123"}"#;
        match parse_challenge(body) {
            Some(IdentityResponse::CaptchaRequired(c)) => assert_eq!(c.site_key, "site-123"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_plain_error_body_is_not_a_challenge() {
        let body = r#"{"error":"invalid_grant","errorDescription":"Username or password is incorrect."}"#;
        assert!(parse_challenge(body).is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpIdentityClient::new("https://identity.example.com/").unwrap();
        assert_eq!(client.base_url, "https://identity.example.com");
    }
}
