//! Identity endpoint request and response types.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use keyfort_common::{Error, Result};
use keyfort_crypto::{EncString, KdfConfig};

/// Device metadata sent with every token request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub device_type: u8,
}

/// Second-factor providers, identified on the wire by a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TwoFactorProviderType {
    Authenticator,
    Email,
    Duo,
    YubiKey,
    U2f,
    Remember,
    OrganizationDuo,
    WebAuthn,
}

impl From<TwoFactorProviderType> for u8 {
    fn from(provider: TwoFactorProviderType) -> u8 {
        match provider {
            TwoFactorProviderType::Authenticator => 0,
            TwoFactorProviderType::Email => 1,
            TwoFactorProviderType::Duo => 2,
            TwoFactorProviderType::YubiKey => 3,
            TwoFactorProviderType::U2f => 4,
            TwoFactorProviderType::Remember => 5,
            TwoFactorProviderType::OrganizationDuo => 6,
            TwoFactorProviderType::WebAuthn => 7,
        }
    }
}

impl TryFrom<u8> for TwoFactorProviderType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Authenticator,
            1 => Self::Email,
            2 => Self::Duo,
            3 => Self::YubiKey,
            4 => Self::U2f,
            5 => Self::Remember,
            6 => Self::OrganizationDuo,
            7 => Self::WebAuthn,
            v => {
                return Err(Error::Protocol(format!(
                    "unknown two-factor provider: {v}"
                )))
            }
        })
    }
}

/// Proof of a completed second factor, attached to a token request replay.
#[derive(Debug, Clone)]
pub struct TwoFactorProof {
    pub provider: TwoFactorProviderType,
    pub token: String,
    /// Ask the server for a long-lived remember token on success.
    pub remember: bool,
}

/// The credential grant inside a token request.
#[derive(Debug, Clone)]
pub enum Grant {
    /// Master password login; the password itself never appears here, only
    /// the server-authorization hash.
    Password {
        email: String,
        master_password_hash_b64: String,
    },
    /// SSO authorization-code exchange (PKCE).
    AuthorizationCode {
        code: String,
        code_verifier: String,
        redirect_uri: String,
    },
    /// Machine-to-machine API key.
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    /// Login via an approved device-approval request.
    AuthRequest {
        email: String,
        request_id: String,
        access_code: String,
    },
    /// WebAuthn assertion token.
    WebAuthn { token: String },
}

/// A complete token request: grant plus device metadata and any challenge
/// answers accumulated across replays.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub client_id: String,
    pub grant: Grant,
    pub device: DeviceInfo,
    pub two_factor: Option<TwoFactorProof>,
    pub captcha_response: Option<String>,
}

impl TokenRequest {
    /// Encode as form fields for the token endpoint.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("scope".to_string(), "api offline_access".to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            (
                "deviceIdentifier".to_string(),
                self.device.identifier.clone(),
            ),
            ("deviceName".to_string(), self.device.name.clone()),
            ("deviceType".to_string(), self.device.device_type.to_string()),
        ];

        match &self.grant {
            Grant::Password {
                email,
                master_password_hash_b64,
            } => {
                fields.push(("grant_type".to_string(), "password".to_string()));
                fields.push(("username".to_string(), email.clone()));
                fields.push(("password".to_string(), master_password_hash_b64.clone()));
            }
            Grant::AuthorizationCode {
                code,
                code_verifier,
                redirect_uri,
            } => {
                fields.push(("grant_type".to_string(), "authorization_code".to_string()));
                fields.push(("code".to_string(), code.clone()));
                fields.push(("code_verifier".to_string(), code_verifier.clone()));
                fields.push(("redirect_uri".to_string(), redirect_uri.clone()));
            }
            Grant::ClientCredentials {
                client_id,
                client_secret,
            } => {
                fields.push(("grant_type".to_string(), "client_credentials".to_string()));
                fields.push(("client_id".to_string(), client_id.clone()));
                fields.push(("client_secret".to_string(), client_secret.clone()));
            }
            Grant::AuthRequest {
                email,
                request_id,
                access_code,
            } => {
                fields.push(("grant_type".to_string(), "password".to_string()));
                fields.push(("username".to_string(), email.clone()));
                fields.push(("password".to_string(), access_code.clone()));
                fields.push(("authRequest".to_string(), request_id.clone()));
            }
            Grant::WebAuthn { token } => {
                fields.push(("grant_type".to_string(), "webauthn".to_string()));
                fields.push(("token".to_string(), token.clone()));
            }
        }

        if let Some(two_factor) = &self.two_factor {
            fields.push(("twoFactorToken".to_string(), two_factor.token.clone()));
            fields.push((
                "twoFactorProvider".to_string(),
                u8::from(two_factor.provider).to_string(),
            ));
            fields.push((
                "twoFactorRemember".to_string(),
                if two_factor.remember { "1" } else { "0" }.to_string(),
            ));
        }
        if let Some(captcha) = &self.captcha_response {
            fields.push(("captchaResponse".to_string(), captcha.clone()));
        }

        fields
    }
}

/// Trusted-device decryption option inside a token response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDeviceOption {
    /// User key wrapped under this device's device key.
    #[serde(default)]
    pub encrypted_user_key: Option<EncString>,
    #[serde(default)]
    pub has_admin_approval: bool,
}

/// WebAuthn PRF decryption option inside a token response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnPrfOption {
    /// User key wrapped under the PRF-derived symmetric key.
    pub encrypted_user_key: EncString,
    /// RSA private key wrapped under the user key.
    pub encrypted_private_key: EncString,
}

/// How this account can reach its user key without a master password.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDecryptionOptions {
    pub has_master_password: bool,
    pub trusted_device: Option<TrustedDeviceOption>,
    pub webauthn_prf: Option<WebAuthnPrfOption>,
}

/// Successful token exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    /// Master-key-wrapped user key. Absent for accounts still on legacy
    /// master-key encryption and for decryption-option flows.
    #[serde(default)]
    pub key: Option<EncString>,
    /// User-key-wrapped RSA private key.
    #[serde(default)]
    pub private_key: Option<EncString>,
    #[serde(default)]
    pub kdf: Option<KdfConfig>,
    #[serde(default)]
    pub force_password_reset: bool,
    /// Long-lived remember token, returned when a second factor was
    /// completed with `remember` set.
    #[serde(default)]
    pub two_factor_token: Option<String>,
    #[serde(default)]
    pub user_decryption_options: Option<UserDecryptionOptions>,
}

/// The server wants a second factor before issuing a token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TwoFactorChallenge {
    pub two_factor_providers: Vec<TwoFactorProviderType>,
    pub two_factor_metadata: HashMap<String, Value>,
    /// Bypass token proving the captcha already passed; carried into the
    /// replay so it is not asked twice.
    pub captcha_token: Option<String>,
}

/// The server wants a captcha before issuing a token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaChallenge {
    pub site_key: String,
}

/// All the ways the token endpoint can answer short of an outright error.
#[derive(Debug, Clone)]
pub enum IdentityResponse {
    Authenticated(Box<TokenResponse>),
    TwoFactorRequired(TwoFactorChallenge),
    CaptchaRequired(CaptchaChallenge),
}

/// The identity endpoint surface, abstracted for testing.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Fetch the account's KDF configuration by email, before any
    /// credential is sent.
    async fn prelogin(&self, email: &str) -> Result<KdfConfig>;

    /// Exchange a credential grant for tokens, or a challenge.
    async fn request_token(&self, request: &TokenRequest) -> Result<IdentityResponse>;
}
