//! API key (client credentials) login.
//!
//! Machine login authenticates only; key material arrives later when the
//! caller unlocks with the master password.

use crate::api::{Grant, TokenRequest};

use super::{LoginContext, SessionCache};

#[derive(Clone)]
pub struct ApiKeyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

pub(super) fn build_cache(ctx: &LoginContext, credentials: &ApiKeyCredentials) -> SessionCache {
    SessionCache {
        request: TokenRequest {
            client_id: credentials.client_id.clone(),
            grant: Grant::ClientCredentials {
                client_id: credentials.client_id.clone(),
                client_secret: credentials.client_secret.clone(),
            },
            device: ctx.device.clone(),
            two_factor: None,
            captcha_response: None,
        },
        email: None,
        kdf: None,
        master_key: None,
        recovered_user_key: None,
    }
}
