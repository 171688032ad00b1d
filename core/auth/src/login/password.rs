//! Master password login.

use tracing::debug;

use keyfort_common::{Error, Result};
use keyfort_crypto::{derive_master_key, HashPurpose, MasterKey, UserKey};
use keyfort_keystore::KeyHierarchyStore;

use crate::api::{Grant, TokenRequest, TokenResponse, TwoFactorProof, TwoFactorProviderType};

use super::{LoginContext, SessionCache};

#[derive(Clone)]
pub struct PasswordCredentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Prelogin for the KDF parameters, derive the master key off the runtime
/// thread, and assemble the password grant. A remembered two-factor token
/// for this email rides along on the first attempt.
pub(super) async fn build_cache(
    ctx: &LoginContext,
    credentials: &PasswordCredentials,
) -> Result<SessionCache> {
    let kdf = ctx.identity.prelogin(&credentials.email).await?;
    kdf.validate()?;

    let (master_key, hash_b64) = {
        let password = credentials.password.clone();
        let email = credentials.email.clone();
        let kdf = kdf.clone();
        tokio::task::spawn_blocking(move || -> Result<(MasterKey, String)> {
            let master = derive_master_key(password.as_bytes(), &email, &kdf)?;
            let hash = master
                .hash(password.as_bytes(), HashPurpose::ServerAuthorization)
                .to_b64();
            Ok((master, hash))
        })
        .await
        .map_err(|e| Error::Crypto(format!("derivation task: {e}")))??
    };

    let mut request = TokenRequest {
        client_id: ctx.client_id.clone(),
        grant: Grant::Password {
            email: credentials.email.clone(),
            master_password_hash_b64: hash_b64,
        },
        device: ctx.device.clone(),
        two_factor: None,
        captcha_response: None,
    };
    if let Some(token) = ctx.two_factor.get(&credentials.email).await {
        debug!("attaching remembered two-factor token");
        request.two_factor = Some(TwoFactorProof {
            provider: TwoFactorProviderType::Remember,
            token,
            remember: false,
        });
    }

    Ok(SessionCache {
        request,
        email: Some(credentials.email.clone()),
        kdf: Some(kdf),
        master_key: Some(master_key),
        recovered_user_key: None,
    })
}

/// The user key comes from unwrapping the response's wrapped key under the
/// derived master key. An account with no wrapped key yet is still on
/// legacy master-key encryption, where the master key doubles as the user
/// key.
pub(super) fn login_keys(
    response: &TokenResponse,
    cache: &SessionCache,
) -> Result<Option<(Option<MasterKey>, UserKey)>> {
    let master_key = cache
        .master_key
        .as_ref()
        .ok_or_else(|| Error::Authentication("no derived master key".to_string()))?;
    let user_key = match &response.key {
        Some(wrapped) => KeyHierarchyStore::unwrap_user_key(wrapped, master_key)?,
        None => UserKey::from_master_legacy(master_key),
    };
    Ok(Some((Some(master_key.clone()), user_key)))
}
