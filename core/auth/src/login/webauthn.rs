//! WebAuthn login with optional PRF-based decryption.

use keyfort_common::Result;
use keyfort_crypto::{decrypt_aes, MasterKey, SymmetricKey, UserKey};

use crate::api::{Grant, TokenRequest, TokenResponse};

use super::{LoginContext, SessionCache};

#[derive(Clone)]
pub struct WebAuthnCredentials {
    pub token: String,
    /// Symmetric key derived from the authenticator's PRF extension, when
    /// the credential supports it. Without it the account authenticates
    /// but stays locked.
    pub prf_key: Option<SymmetricKey>,
}

impl std::fmt::Debug for WebAuthnCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnCredentials").finish_non_exhaustive()
    }
}

pub(super) fn build_cache(ctx: &LoginContext, credentials: &WebAuthnCredentials) -> SessionCache {
    SessionCache {
        request: TokenRequest {
            client_id: ctx.client_id.clone(),
            grant: Grant::WebAuthn {
                token: credentials.token.clone(),
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
    credentials: &WebAuthnCredentials,
) -> Result<Option<(Option<MasterKey>, UserKey)>> {
    let Some(prf_key) = &credentials.prf_key else {
        return Ok(None);
    };
    let Some(prf_option) = response
        .user_decryption_options
        .as_ref()
        .and_then(|o| o.webauthn_prf.as_ref())
    else {
        return Ok(None);
    };
    let raw = decrypt_aes(&prf_option.encrypted_user_key, prf_key)?;
    Ok(Some((None, UserKey::from_bytes(&raw)?)))
}
