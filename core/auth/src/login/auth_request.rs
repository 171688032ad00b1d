//! Login with keys recovered through device approval.

use keyfort_common::{Error, Result};
use keyfort_crypto::{MasterKey, UserKey};
use keyfort_keystore::KeyHierarchyStore;

use crate::api::{Grant, TokenRequest, TokenResponse};
use crate::auth_request::RecoveredKeys;

use super::{LoginContext, SessionCache};

#[derive(Clone)]
pub struct AuthRequestCredentials {
    pub email: String,
    pub request_id: String,
    pub access_code: String,
    /// Key material the approving device relayed.
    pub recovered: RecoveredKeys,
}

impl std::fmt::Debug for AuthRequestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequestCredentials")
            .field("email", &self.email)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

pub(super) fn build_cache(
    ctx: &LoginContext,
    credentials: &AuthRequestCredentials,
) -> SessionCache {
    let (master_key, recovered_user_key) = match &credentials.recovered {
        RecoveredKeys::MasterKey { master_key, .. } => (Some(master_key.clone()), None),
        RecoveredKeys::UserKey(user_key) => (None, Some(user_key.clone())),
    };
    SessionCache {
        request: TokenRequest {
            client_id: ctx.client_id.clone(),
            grant: Grant::AuthRequest {
                email: credentials.email.clone(),
                request_id: credentials.request_id.clone(),
                access_code: credentials.access_code.clone(),
            },
            device: ctx.device.clone(),
            two_factor: None,
            captcha_response: None,
        },
        email: Some(credentials.email.clone()),
        kdf: None,
        master_key,
        recovered_user_key,
    }
}

pub(super) fn login_keys(
    response: &TokenResponse,
    cache: &SessionCache,
) -> Result<Option<(Option<MasterKey>, UserKey)>> {
    if let Some(user_key) = &cache.recovered_user_key {
        return Ok(Some((None, user_key.clone())));
    }
    let master_key = cache
        .master_key
        .as_ref()
        .ok_or_else(|| Error::Authentication("no recovered keys".to_string()))?;
    let wrapped = response
        .key
        .as_ref()
        .ok_or_else(|| Error::Authentication("no wrapped user key in response".to_string()))?;
    let user_key = KeyHierarchyStore::unwrap_user_key(wrapped, master_key)?;
    Ok(Some((Some(master_key.clone()), user_key)))
}
