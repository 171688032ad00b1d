//! The per-user key hierarchy and its single source of truth.

use std::collections::HashMap;

use tokio::sync::{watch, RwLock};
use tracing::debug;

use keyfort_common::{Error, OrgId, Result, UserId};
use keyfort_crypto::{
    decrypt_aes, rsa_decrypt, EncString, KdfConfig, KeyPair, MasterKey, OrgKey, UserKey,
};

/// Which keys are currently present for a user, plus a generation counter
/// that increments on every mutation of that user's state. Observers that
/// cache derived state compare generations to detect staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyPresence {
    pub has_master_key: bool,
    pub has_user_key: bool,
    pub generation: u64,
}

/// Everything a successful login produces, applied to the store as one
/// atomic unit by [`KeyHierarchyStore::commit_login`].
pub struct LoginKeys {
    pub master_key: Option<MasterKey>,
    pub user_key: UserKey,
    /// User-key-wrapped RSA private key, when the account has one.
    pub wrapped_private_key: Option<EncString>,
    /// Organization keys, RSA-wrapped under the account's public key.
    pub org_keys: HashMap<OrgId, EncString>,
    pub kdf: KdfConfig,
}

/// A consistent copy of one user's unlocked key state, taken under a
/// single read lock.
pub struct KeySnapshot {
    pub user_key: UserKey,
    pub key_pair: Option<KeyPair>,
    pub org_keys: HashMap<OrgId, OrgKey>,
    pub kdf: Option<KdfConfig>,
    pub generation: u64,
}

struct UserState {
    master_key: Option<MasterKey>,
    user_key: Option<UserKey>,
    org_keys: HashMap<OrgId, OrgKey>,
    key_pair: Option<KeyPair>,
    kdf: Option<KdfConfig>,
    generation: u64,
    presence: watch::Sender<KeyPresence>,
}

impl UserState {
    fn new() -> Self {
        let (presence, _) = watch::channel(KeyPresence::default());
        Self {
            master_key: None,
            user_key: None,
            org_keys: HashMap::new(),
            key_pair: None,
            kdf: None,
            generation: 0,
            presence,
        }
    }

    fn publish(&mut self) {
        self.generation += 1;
        self.presence.send_replace(KeyPresence {
            has_master_key: self.master_key.is_some(),
            has_user_key: self.user_key.is_some(),
            generation: self.generation,
        });
    }
}

/// In-memory store for every account's key material.
///
/// All mutations for one user happen under a single lock and publish a
/// [`KeyPresence`] update, so observers never see a partially-applied
/// transition. Keys are handed out as clones; every key type zeroizes on
/// drop, so callers should let their copy go out of scope as soon as the
/// operation using it completes.
#[derive(Default)]
pub struct KeyHierarchyStore {
    users: RwLock<HashMap<UserId, UserState>>,
}

impl KeyHierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch presence transitions for one user. The receiver starts at the
    /// user's current presence and updates on every mutation.
    pub async fn subscribe(&self, user_id: &UserId) -> watch::Receiver<KeyPresence> {
        let mut users = self.users.write().await;
        users
            .entry(user_id.clone())
            .or_insert_with(UserState::new)
            .presence
            .subscribe()
    }

    /// Unwrap a master-key-wrapped user key.
    ///
    /// The master key is stretched into its encryption + MAC pair via HKDF
    /// and the envelope's MAC is verified before decryption.
    ///
    /// # Errors
    /// - `DecryptionFailed` for any failure. A wrong password and a
    ///   corrupted stored key are deliberately indistinguishable here.
    pub fn unwrap_user_key(wrapped: &EncString, master_key: &MasterKey) -> Result<UserKey> {
        let stretched = master_key.expand().map_err(|_| Error::DecryptionFailed)?;
        let plaintext = decrypt_aes(wrapped, &stretched).map_err(|_| Error::DecryptionFailed)?;
        UserKey::from_bytes(&plaintext).map_err(|_| Error::DecryptionFailed)
    }

    pub async fn set_master_key(&self, user_id: &UserId, key: MasterKey) {
        self.mutate(user_id, |state| {
            state.master_key = Some(key);
        })
        .await;
    }

    pub async fn clear_master_key(&self, user_id: &UserId) {
        self.mutate(user_id, |state| {
            state.master_key = None;
        })
        .await;
    }

    pub async fn set_user_key(&self, user_id: &UserId, key: UserKey) {
        self.mutate(user_id, |state| {
            state.user_key = Some(key);
        })
        .await;
    }

    /// Remove the user key and everything it protects.
    ///
    /// Organization keys and the key pair are only reachable through the
    /// user key, so they are cleared in the same transition.
    pub async fn clear_user_key(&self, user_id: &UserId) {
        self.mutate(user_id, |state| {
            state.user_key = None;
            state.org_keys.clear();
            state.key_pair = None;
        })
        .await;
        debug!(user = %user_id, "user key cleared, dependent keys dropped");
    }

    /// Drop all key material for a user (logout).
    pub async fn clear_user(&self, user_id: &UserId) {
        self.mutate(user_id, |state| {
            state.master_key = None;
            state.user_key = None;
            state.org_keys.clear();
            state.key_pair = None;
            state.kdf = None;
        })
        .await;
    }

    pub async fn master_key(&self, user_id: &UserId) -> Option<MasterKey> {
        self.users
            .read()
            .await
            .get(user_id)
            .and_then(|s| s.master_key.clone())
    }

    pub async fn user_key(&self, user_id: &UserId) -> Option<UserKey> {
        self.users
            .read()
            .await
            .get(user_id)
            .and_then(|s| s.user_key.clone())
    }

    pub async fn has_user_key(&self, user_id: &UserId) -> bool {
        self.users
            .read()
            .await
            .get(user_id)
            .map(|s| s.user_key.is_some())
            .unwrap_or(false)
    }

    /// The user key, falling back to the master key reinterpreted as a
    /// legacy 32-byte user key for accounts that predate the split.
    ///
    /// # Errors
    /// - `NotFound` when neither key is present (the account is locked)
    pub async fn user_key_with_legacy_support(&self, user_id: &UserId) -> Result<UserKey> {
        let users = self.users.read().await;
        let state = users
            .get(user_id)
            .ok_or_else(|| Error::NotFound(format!("no keys for user {user_id}")))?;
        if let Some(key) = &state.user_key {
            return Ok(key.clone());
        }
        if let Some(master) = &state.master_key {
            return Ok(UserKey::from_master_legacy(master));
        }
        Err(Error::NotFound(format!("user {user_id} is locked")))
    }

    pub async fn set_org_keys(&self, user_id: &UserId, keys: HashMap<OrgId, OrgKey>) {
        self.mutate(user_id, |state| {
            state.org_keys = keys;
        })
        .await;
    }

    pub async fn org_key(&self, user_id: &UserId, org_id: &OrgId) -> Option<OrgKey> {
        self.users
            .read()
            .await
            .get(user_id)
            .and_then(|s| s.org_keys.get(org_id).cloned())
    }

    pub async fn org_keys(&self, user_id: &UserId) -> HashMap<OrgId, OrgKey> {
        self.users
            .read()
            .await
            .get(user_id)
            .map(|s| s.org_keys.clone())
            .unwrap_or_default()
    }

    /// Unwrap and install the account's RSA key pair.
    ///
    /// # Errors
    /// - `NotFound` when the user key is absent
    /// - `DecryptionFailed` / `Crypto` when the wrapped key does not open
    ///   under the current user key
    pub async fn set_key_pair(&self, user_id: &UserId, wrapped: &EncString) -> Result<()> {
        let user_key = self
            .user_key(user_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("user {user_id} is locked")))?;
        let private_der = decrypt_aes(wrapped, user_key.key())?;
        let pair = KeyPair::from_private_der(&private_der)?;
        self.mutate(user_id, |state| {
            state.key_pair = Some(pair);
        })
        .await;
        Ok(())
    }

    pub async fn key_pair(&self, user_id: &UserId) -> Option<KeyPair> {
        self.users
            .read()
            .await
            .get(user_id)
            .and_then(|s| s.key_pair.clone())
    }

    pub async fn set_kdf_config(&self, user_id: &UserId, kdf: KdfConfig) {
        self.mutate(user_id, |state| {
            state.kdf = Some(kdf);
        })
        .await;
    }

    pub async fn kdf_config(&self, user_id: &UserId) -> Option<KdfConfig> {
        self.users
            .read()
            .await
            .get(user_id)
            .and_then(|s| s.kdf.clone())
    }

    pub async fn generation(&self, user_id: &UserId) -> u64 {
        self.users
            .read()
            .await
            .get(user_id)
            .map(|s| s.generation)
            .unwrap_or(0)
    }

    /// Apply a successful login's keys as one transition.
    ///
    /// The wrapped private key and organization keys are unwrapped first,
    /// outside the lock; if any of them fails to open, nothing is applied
    /// and the store is left exactly as it was.
    ///
    /// # Postconditions
    /// - Observers see a single presence update covering the whole commit
    ///
    /// # Errors
    /// - `DecryptionFailed` / `Crypto` when a wrapped key does not open
    pub async fn commit_login(&self, user_id: &UserId, keys: LoginKeys) -> Result<()> {
        let key_pair = match &keys.wrapped_private_key {
            Some(wrapped) => {
                let private_der = decrypt_aes(wrapped, keys.user_key.key())?;
                Some(KeyPair::from_private_der(&private_der)?)
            }
            None => None,
        };

        let mut org_keys = HashMap::with_capacity(keys.org_keys.len());
        for (org_id, wrapped) in &keys.org_keys {
            let pair = key_pair.as_ref().ok_or_else(|| {
                Error::Crypto("organization keys present but no private key".to_string())
            })?;
            let raw = rsa_decrypt(wrapped, pair.private_der())?;
            org_keys.insert(org_id.clone(), OrgKey::from_bytes(&raw)?);
        }

        self.mutate(user_id, |state| {
            state.master_key = keys.master_key;
            state.user_key = Some(keys.user_key);
            state.org_keys = org_keys;
            state.key_pair = key_pair;
            state.kdf = Some(keys.kdf);
        })
        .await;
        debug!(user = %user_id, "login keys committed");
        Ok(())
    }

    /// Read one user's unlocked state as a single consistent snapshot.
    ///
    /// Returns `None` when the user key is absent; a session cannot exist
    /// for a locked account.
    pub async fn snapshot(&self, user_id: &UserId) -> Option<KeySnapshot> {
        let users = self.users.read().await;
        let state = users.get(user_id)?;
        let user_key = state.user_key.clone()?;
        Some(KeySnapshot {
            user_key,
            key_pair: state.key_pair.clone(),
            org_keys: state.org_keys.clone(),
            kdf: state.kdf.clone(),
            generation: state.generation,
        })
    }

    async fn mutate(&self, user_id: &UserId, f: impl FnOnce(&mut UserState)) {
        let mut users = self.users.write().await;
        let state = users.entry(user_id.clone()).or_insert_with(UserState::new);
        f(state);
        state.publish();
    }
}
