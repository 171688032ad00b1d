//! Account bookkeeping behind a storage trait.
//!
//! Key material never passes through here in the clear: the store holds
//! profiles, tokens, KDF configuration, and the *wrapped* user key.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use keyfort_common::{Error, Result, UserId};
use keyfort_crypto::{EncString, KdfConfig};

/// Profile data recorded at login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountProfile {
    pub email: String,
    pub name: Option<String>,
}

/// Persistent account state.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn upsert_account(&self, user_id: &UserId, profile: AccountProfile) -> Result<()>;

    async fn set_active(&self, user_id: &UserId) -> Result<()>;
    async fn active(&self) -> Result<Option<UserId>>;

    async fn set_tokens(
        &self,
        user_id: &UserId,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<()>;

    async fn set_kdf_config(&self, user_id: &UserId, kdf: KdfConfig) -> Result<()>;
    async fn kdf_config(&self, user_id: &UserId) -> Result<Option<KdfConfig>>;

    async fn set_wrapped_user_key(&self, user_id: &UserId, wrapped: EncString) -> Result<()>;
    async fn wrapped_user_key(&self, user_id: &UserId) -> Result<Option<EncString>>;

    /// Persist the outcome of a KDF rotation as one unit: new parameters,
    /// the re-wrapped user key, and the new server hash together. Partial
    /// application would leave the account unable to unlock.
    async fn persist_kdf_rotation(
        &self,
        user_id: &UserId,
        kdf: KdfConfig,
        wrapped_user_key: EncString,
        server_hash_b64: String,
    ) -> Result<()>;
}

#[derive(Default)]
struct AccountRecord {
    profile: AccountProfile,
    access_token: Option<String>,
    refresh_token: Option<String>,
    kdf: Option<KdfConfig>,
    wrapped_user_key: Option<EncString>,
    server_hash_b64: Option<String>,
}

/// In-memory `AccountStore`, the default for tests and ephemeral clients.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<UserId, AccountRecord>,
    active: Option<UserId>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile(&self, user_id: &UserId) -> Option<AccountProfile> {
        self.inner
            .read()
            .await
            .accounts
            .get(user_id)
            .map(|r| r.profile.clone())
    }

    pub async fn server_hash_b64(&self, user_id: &UserId) -> Option<String> {
        self.inner
            .read()
            .await
            .accounts
            .get(user_id)
            .and_then(|r| r.server_hash_b64.clone())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn upsert_account(&self, user_id: &UserId, profile: AccountProfile) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.entry(user_id.clone()).or_default().profile = profile;
        Ok(())
    }

    async fn set_active(&self, user_id: &UserId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(user_id) {
            return Err(Error::NotFound(format!("unknown account {user_id}")));
        }
        inner.active = Some(user_id.clone());
        Ok(())
    }

    async fn active(&self) -> Result<Option<UserId>> {
        Ok(self.inner.read().await.active.clone())
    }

    async fn set_tokens(
        &self,
        user_id: &UserId,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner.accounts.entry(user_id.clone()).or_default();
        record.access_token = Some(access_token);
        record.refresh_token = refresh_token;
        Ok(())
    }

    async fn set_kdf_config(&self, user_id: &UserId, kdf: KdfConfig) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.entry(user_id.clone()).or_default().kdf = Some(kdf);
        Ok(())
    }

    async fn kdf_config(&self, user_id: &UserId) -> Result<Option<KdfConfig>> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .get(user_id)
            .and_then(|r| r.kdf.clone()))
    }

    async fn set_wrapped_user_key(&self, user_id: &UserId, wrapped: EncString) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .accounts
            .entry(user_id.clone())
            .or_default()
            .wrapped_user_key = Some(wrapped);
        Ok(())
    }

    async fn wrapped_user_key(&self, user_id: &UserId) -> Result<Option<EncString>> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .get(user_id)
            .and_then(|r| r.wrapped_user_key.clone()))
    }

    async fn persist_kdf_rotation(
        &self,
        user_id: &UserId,
        kdf: KdfConfig,
        wrapped_user_key: EncString,
        server_hash_b64: String,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| Error::NotFound(format!("unknown account {user_id}")))?;
        record.kdf = Some(kdf);
        record.wrapped_user_key = Some(wrapped_user_key);
        record.server_hash_b64 = Some(server_hash_b64);
        Ok(())
    }
}
