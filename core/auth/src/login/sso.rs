//! SSO authorization-code login.
//!
//! SSO authenticates without ever producing a master key. The user key is
//! only available at login time on a trusted device, wrapped under that
//! device's key; otherwise the account comes up authenticated but locked.

use keyfort_common::Result;
use keyfort_crypto::{decrypt_aes, MasterKey, SymmetricKey, UserKey};

use crate::api::{Grant, TokenRequest, TokenResponse};

use super::{LoginContext, SessionCache};

#[derive(Clone)]
pub struct SsoCredentials {
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    /// This device's long-lived key, present only on trusted devices.
    pub device_key: Option<SymmetricKey>,
}

impl std::fmt::Debug for SsoCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoCredentials")
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

pub(super) fn build_cache(ctx: &LoginContext, credentials: &SsoCredentials) -> SessionCache {
    SessionCache {
        request: TokenRequest {
            client_id: ctx.client_id.clone(),
            grant: Grant::AuthorizationCode {
                code: credentials.code.clone(),
                code_verifier: credentials.code_verifier.clone(),
                redirect_uri: credentials.redirect_uri.clone(),
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

pub(super) fn login_keys(
    response: &TokenResponse,
    credentials: &SsoCredentials,
) -> Result<Option<(Option<MasterKey>, UserKey)>> {
    let Some(device_key) = &credentials.device_key else {
        return Ok(None);
    };
    let Some(wrapped) = response
        .user_decryption_options
        .as_ref()
        .and_then(|o| o.trusted_device.as_ref())
        .and_then(|t| t.encrypted_user_key.as_ref())
    else {
        return Ok(None);
    };
    let raw = decrypt_aes(wrapped, device_key)?;
    Ok(Some((None, UserKey::from_bytes(&raw)?)))
}
