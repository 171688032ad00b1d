//! The login state machine.
//!
//! One [`LoginStrategy`] instance drives one login attempt from start to
//! finish. The initial credential exchange may come back as a two-factor
//! or captcha challenge; the strategy caches the prepared token request
//! (and any derived key material) so the caller can answer the challenge
//! and replay without re-entering credentials or re-deriving keys.
//!
//! On success the strategy records the account, commits all key material
//! to the key store in one transition, and publishes `LoggedIn`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use keyfort_common::{Error, Result, UserId};
use keyfort_crypto::{KdfConfig, MasterKey, UserKey};
use keyfort_keystore::{KeyHierarchyStore, LoginKeys};

use crate::accounts::{AccountProfile, AccountStore};
use crate::api::{
    DeviceInfo, IdentityClient, IdentityResponse, TokenRequest, TokenResponse, TwoFactorProof,
    TwoFactorProviderType,
};
use crate::events::{EventBus, LifecycleEvent};
use crate::jwt;
use crate::two_factor::TwoFactorTokenCache;

pub mod api_key;
pub mod auth_request;
pub mod password;
pub mod sso;
pub mod webauthn;

pub use api_key::ApiKeyCredentials;
pub use auth_request::AuthRequestCredentials;
pub use password::PasswordCredentials;
pub use sso::SsoCredentials;
pub use webauthn::WebAuthnCredentials;

/// What kind of client this process is, which decides whether it may
/// proceed with an account that still needs encryption-key migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Web,
    Desktop,
    Browser,
    Mobile,
    Cli,
}

/// Whether this client may log into a legacy-encryption account. The
/// migration itself happens in the web surface, so only it proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPolicy {
    Allowed,
    Forbidden,
}

impl MigrationPolicy {
    pub fn for_role(role: ClientRole) -> Self {
        match role {
            ClientRole::Web => Self::Allowed,
            _ => Self::Forbidden,
        }
    }
}

/// Shared dependencies of every login strategy.
pub struct LoginContext {
    pub identity: Arc<dyn IdentityClient>,
    pub accounts: Arc<dyn AccountStore>,
    pub keys: Arc<KeyHierarchyStore>,
    pub two_factor: Arc<TwoFactorTokenCache>,
    pub events: EventBus,
    pub device: DeviceInfo,
    pub client_id: String,
    pub migration_policy: MigrationPolicy,
}

/// Outcome of a login attempt. Challenges are routine outcomes, not
/// errors; only transport and protocol failures surface as `Err`.
#[derive(Debug)]
pub enum AuthResult {
    Authenticated {
        user_id: UserId,
        force_password_reset: bool,
    },
    TwoFactorRequired {
        providers: Vec<TwoFactorProviderType>,
        /// Per-provider hints (masked email, Duo host, ...) for the UI.
        metadata: HashMap<String, serde_json::Value>,
    },
    CaptchaRequired {
        site_key: String,
    },
    /// The account is still on legacy encryption and this client may not
    /// migrate it.
    KeyMigrationRequired,
}

/// Credentials for one of the supported login methods.
#[derive(Debug, Clone)]
pub enum LoginMethod {
    Password(PasswordCredentials),
    Sso(SsoCredentials),
    ApiKey(ApiKeyCredentials),
    AuthRequest(AuthRequestCredentials),
    WebAuthn(WebAuthnCredentials),
}

/// State carried across challenge replays within one login attempt.
#[derive(Clone)]
pub(crate) struct SessionCache {
    pub(crate) request: TokenRequest,
    pub(crate) email: Option<String>,
    pub(crate) kdf: Option<KdfConfig>,
    pub(crate) master_key: Option<MasterKey>,
    pub(crate) recovered_user_key: Option<UserKey>,
}

pub struct LoginStrategy {
    ctx: Arc<LoginContext>,
    method: LoginMethod,
    cache: Mutex<Option<SessionCache>>,
}

impl LoginStrategy {
    pub fn new(ctx: Arc<LoginContext>, method: LoginMethod) -> Self {
        Self {
            ctx,
            method,
            cache: Mutex::new(None),
        }
    }

    /// Run the initial credential exchange.
    pub async fn login(&self) -> Result<AuthResult> {
        let cache = self.build_cache().await?;
        *self.cache.lock().await = Some(cache);
        self.submit().await
    }

    /// Replay the cached request with a second-factor answer.
    ///
    /// # Errors
    /// - `Authentication` when no login attempt is in progress
    pub async fn login_two_factor(&self, proof: TwoFactorProof) -> Result<AuthResult> {
        {
            let mut cache = self.cache.lock().await;
            let cache = cache
                .as_mut()
                .ok_or_else(|| Error::Authentication("no login in progress".to_string()))?;
            cache.request.two_factor = Some(proof);
        }
        self.submit().await
    }

    /// Replay the cached request with a captcha answer.
    pub async fn login_captcha(&self, captcha_response: String) -> Result<AuthResult> {
        {
            let mut cache = self.cache.lock().await;
            let cache = cache
                .as_mut()
                .ok_or_else(|| Error::Authentication("no login in progress".to_string()))?;
            cache.request.captcha_response = Some(captcha_response);
        }
        self.submit().await
    }

    async fn build_cache(&self) -> Result<SessionCache> {
        Ok(match &self.method {
            LoginMethod::Password(c) => password::build_cache(&self.ctx, c).await?,
            LoginMethod::Sso(c) => sso::build_cache(&self.ctx, c),
            LoginMethod::ApiKey(c) => api_key::build_cache(&self.ctx, c),
            LoginMethod::AuthRequest(c) => auth_request::build_cache(&self.ctx, c),
            LoginMethod::WebAuthn(c) => webauthn::build_cache(&self.ctx, c),
        })
    }

    async fn submit(&self) -> Result<AuthResult> {
        let request = {
            let cache = self.cache.lock().await;
            cache
                .as_ref()
                .ok_or_else(|| Error::Authentication("no login in progress".to_string()))?
                .request
                .clone()
        };

        match self.ctx.identity.request_token(&request).await? {
            IdentityResponse::Authenticated(response) => {
                self.process_token_response(*response).await
            }
            IdentityResponse::TwoFactorRequired(challenge) => {
                debug!("two-factor challenge received");
                let mut cache = self.cache.lock().await;
                if let Some(cache) = cache.as_mut() {
                    // a remembered token that still gets challenged is
                    // stale; drop it so it is not retried forever
                    if let Some(email) = &cache.email {
                        self.ctx.two_factor.invalidate(email).await;
                    }
                    cache.request.two_factor = None;
                    if challenge.captcha_token.is_some() {
                        cache.request.captcha_response = challenge.captcha_token.clone();
                    }
                }
                Ok(AuthResult::TwoFactorRequired {
                    providers: challenge.two_factor_providers,
                    metadata: challenge.two_factor_metadata,
                })
            }
            IdentityResponse::CaptchaRequired(challenge) => {
                debug!("captcha challenge received");
                Ok(AuthResult::CaptchaRequired {
                    site_key: challenge.site_key,
                })
            }
        }
    }

    // A password login against an account with no wrapped user key means
    // the account never migrated off master-key encryption.
    fn requires_key_migration(&self, response: &TokenResponse) -> bool {
        matches!(self.method, LoginMethod::Password(_)) && response.key.is_none()
    }

    async fn process_token_response(&self, response: TokenResponse) -> Result<AuthResult> {
        if self.requires_key_migration(&response) {
            match self.ctx.migration_policy {
                MigrationPolicy::Allowed => {
                    // proceed on the legacy key; the migration surface
                    // takes over after login
                }
                MigrationPolicy::Forbidden => {
                    warn!("account requires encryption key migration");
                    self.ctx.events.publish(LifecycleEvent::KeyMigrationRequired);
                    return Ok(AuthResult::KeyMigrationRequired);
                }
            }
        }

        let claims = jwt::decode_claims(&response.access_token)?;
        let user_id = UserId::new(claims.sub.clone())?;

        let cache = {
            let cache = self.cache.lock().await;
            cache
                .as_ref()
                .ok_or_else(|| Error::Authentication("no login in progress".to_string()))?
                .clone()
        };

        let email = claims.email.clone().or_else(|| cache.email.clone());
        self.ctx
            .accounts
            .upsert_account(
                &user_id,
                AccountProfile {
                    email: email.clone().unwrap_or_default(),
                    name: claims.name.clone(),
                },
            )
            .await?;
        self.ctx.accounts.set_active(&user_id).await?;
        self.ctx
            .accounts
            .set_tokens(
                &user_id,
                response.access_token.clone(),
                response.refresh_token.clone(),
            )
            .await?;

        let kdf = response
            .kdf
            .clone()
            .or_else(|| cache.kdf.clone())
            .unwrap_or_default();
        self.ctx.accounts.set_kdf_config(&user_id, kdf.clone()).await?;
        if let Some(wrapped) = &response.key {
            self.ctx
                .accounts
                .set_wrapped_user_key(&user_id, wrapped.clone())
                .await?;
        }

        if let (Some(email), Some(token)) = (&email, &response.two_factor_token) {
            self.ctx.two_factor.set(email, token.clone()).await;
        }

        if let Some((master_key, user_key)) = self.login_keys(&response, &cache)? {
            let wrapped_private_key = response.private_key.clone().or_else(|| {
                response
                    .user_decryption_options
                    .as_ref()
                    .and_then(|o| o.webauthn_prf.as_ref())
                    .map(|prf| prf.encrypted_private_key.clone())
            });
            self.ctx
                .keys
                .commit_login(
                    &user_id,
                    LoginKeys {
                        master_key,
                        user_key,
                        wrapped_private_key,
                        org_keys: HashMap::new(),
                        kdf,
                    },
                )
                .await?;
        } else {
            // authenticated but locked; record the KDF so a later unlock
            // can derive against it
            self.ctx.keys.set_kdf_config(&user_id, kdf).await;
        }

        info!(user = %user_id, "login complete");
        self.ctx.events.publish(LifecycleEvent::LoggedIn {
            user_id: user_id.clone(),
        });
        Ok(AuthResult::Authenticated {
            user_id,
            force_password_reset: response.force_password_reset,
        })
    }

    fn login_keys(
        &self,
        response: &TokenResponse,
        cache: &SessionCache,
    ) -> Result<Option<(Option<MasterKey>, UserKey)>> {
        match &self.method {
            LoginMethod::Password(_) => password::login_keys(response, cache),
            LoginMethod::Sso(c) => sso::login_keys(response, c),
            LoginMethod::ApiKey(_) => Ok(None),
            LoginMethod::AuthRequest(_) => auth_request::login_keys(response, cache),
            LoginMethod::WebAuthn(c) => webauthn::login_keys(response, c),
        }
    }
}

/// Drop the in-memory keys but keep the account signed in. A later
/// unlock (or fresh login) restores them; the session bridge tears down
/// any live session as a consequence of the user key disappearing.
pub async fn lock(ctx: &LoginContext, user_id: &UserId) {
    ctx.keys.clear_user_key(user_id).await;
    ctx.keys.clear_master_key(user_id).await;
    info!(user = %user_id, "locked");
    ctx.events.publish(LifecycleEvent::Locked {
        user_id: user_id.clone(),
    });
}

/// Drop all of a user's key material and announce the logout.
pub async fn logout(ctx: &LoginContext, user_id: &UserId) {
    ctx.keys.clear_user(user_id).await;
    info!(user = %user_id, "logged out");
    ctx.events.publish(LifecycleEvent::LoggedOut {
        user_id: user_id.clone(),
    });
}
