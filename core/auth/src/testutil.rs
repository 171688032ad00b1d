//! Fixtures shared across this crate's tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::Mutex;

use keyfort_common::{Error, Result};
use keyfort_crypto::{
    derive_master_key, encrypt_aes, EncString, HashPurpose, KdfConfig, KeyPair, MasterKey, UserKey,
};

use crate::api::{
    CaptchaChallenge, IdentityClient, IdentityResponse, TokenRequest, TokenResponse,
    TwoFactorChallenge, TwoFactorProviderType,
};

/// An unsigned JWT carrying just the claims the client reads.
pub fn fake_access_token(user_id: &str, email: &str) -> String {
    let payload = serde_json::json!({ "sub": user_id, "email": email, "name": "Test User" });
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        URL_SAFE_NO_PAD.encode("sig")
    )
}

/// Server-side view of a provisioned account: the keys the real backend
/// would hold in wrapped form.
pub struct ServerAccount {
    pub email: String,
    pub password: String,
    pub kdf: KdfConfig,
    pub master: MasterKey,
    pub user_key: UserKey,
    pub wrapped_user_key: EncString,
    pub wrapped_private_key: EncString,
    pub server_hash_b64: String,
}

impl ServerAccount {
    pub fn provision(email: &str, password: &str) -> Self {
        let kdf = KdfConfig::Pbkdf2 {
            iterations: keyfort_crypto::kdf::PBKDF2_MIN_ITERATIONS,
        };
        let master = derive_master_key(password.as_bytes(), email, &kdf).unwrap();
        let user_key = UserKey::generate();
        let wrapped_user_key =
            encrypt_aes(user_key.key().as_bytes(), &master.expand().unwrap()).unwrap();
        let key_pair = KeyPair::generate().unwrap();
        let wrapped_private_key = key_pair.wrap_private(&user_key).unwrap();
        let server_hash_b64 = master
            .hash(password.as_bytes(), HashPurpose::ServerAuthorization)
            .to_b64();
        Self {
            email: email.to_string(),
            password: password.to_string(),
            kdf,
            master,
            user_key,
            wrapped_user_key,
            wrapped_private_key,
            server_hash_b64,
        }
    }

    pub fn token_response(&self, user_id: &str) -> TokenResponse {
        TokenResponse {
            access_token: fake_access_token(user_id, &self.email),
            refresh_token: Some("refresh".to_string()),
            expires_in: 3600,
            key: Some(self.wrapped_user_key.clone()),
            private_key: Some(self.wrapped_private_key.clone()),
            kdf: Some(self.kdf.clone()),
            force_password_reset: false,
            two_factor_token: None,
            user_decryption_options: None,
        }
    }
}

/// Scripted identity endpoint: records every token request and answers
/// from a queue.
pub struct FakeIdentityClient {
    kdf: KdfConfig,
    responses: Mutex<VecDeque<IdentityResponse>>,
    requests: Mutex<Vec<TokenRequest>>,
}

impl FakeIdentityClient {
    pub fn new(kdf: KdfConfig) -> Self {
        Self {
            kdf,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn queue_authenticated(&self, response: TokenResponse) {
        self.responses
            .lock()
            .await
            .push_back(IdentityResponse::Authenticated(Box::new(response)));
    }

    pub async fn queue_two_factor(&self, providers: Vec<TwoFactorProviderType>) {
        self.responses
            .lock()
            .await
            .push_back(IdentityResponse::TwoFactorRequired(TwoFactorChallenge {
                two_factor_providers: providers,
                ..Default::default()
            }));
    }

    pub async fn queue_captcha(&self, site_key: &str) {
        self.responses
            .lock()
            .await
            .push_back(IdentityResponse::CaptchaRequired(CaptchaChallenge {
                site_key: site_key.to_string(),
            }));
    }

    pub async fn recorded(&self) -> Vec<TokenRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl IdentityClient for FakeIdentityClient {
    async fn prelogin(&self, _email: &str) -> Result<KdfConfig> {
        Ok(self.kdf.clone())
    }

    async fn request_token(&self, request: &TokenRequest) -> Result<IdentityResponse> {
        self.requests.lock().await.push(request.clone());
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| Error::Http("no scripted response left".to_string()))
    }
}
