//! Refcounted SDK session handles derived from the key store.
//!
//! An [`SdkSession`] is an immutable snapshot of one user's unlocked key
//! state, handed out as `Arc` clones. The [`SessionBridge`] keeps at most
//! one live session per user: acquiring again while the store is unchanged
//! returns the same session, acquiring after any key mutation rebuilds it,
//! and a background watcher tears the session down the moment the user key
//! disappears from the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use keyfort_common::{Error, OrgId, Result, UserId};
use keyfort_crypto::{KdfConfig, KeyPair, OrgKey, UserKey};

use crate::store::KeyHierarchyStore;

/// An immutable session snapshot for SDK consumers.
///
/// Holds working copies of the key material; they are zeroized when the
/// last `Arc` clone drops.
pub struct SdkSession {
    user_id: UserId,
    user_key: UserKey,
    key_pair: Option<KeyPair>,
    org_keys: HashMap<OrgId, OrgKey>,
    kdf: KdfConfig,
    generation: u64,
}

impl SdkSession {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn user_key(&self) -> &UserKey {
        &self.user_key
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    pub fn org_key(&self, org_id: &OrgId) -> Option<&OrgKey> {
        self.org_keys.get(org_id)
    }

    pub fn kdf(&self) -> &KdfConfig {
        &self.kdf
    }

    /// Store generation this session was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for SdkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkSession")
            .field("user_id", &self.user_id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

struct SessionEntry {
    session: Arc<SdkSession>,
    refs: usize,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<UserId, SessionEntry>,
    watched: HashSet<UserId>,
}

/// Owns the per-user session arena and its lifecycle.
pub struct SessionBridge {
    store: Arc<KeyHierarchyStore>,
    inner: Mutex<Inner>,
}

impl SessionBridge {
    pub fn new(store: Arc<KeyHierarchyStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Acquire a session for the user, incrementing its reference count.
    ///
    /// Returns the cached session when the store is unchanged since it was
    /// built; rebuilds it when any key input changed.
    ///
    /// # Errors
    /// - `NotFound` when the user key is absent (the account is locked)
    pub async fn acquire(self: &Arc<Self>, user_id: &UserId) -> Result<Arc<SdkSession>> {
        let snapshot = self
            .store
            .snapshot(user_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("user {user_id} is locked")))?;

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.get_mut(user_id) {
            if entry.session.generation == snapshot.generation {
                entry.refs += 1;
                return Ok(Arc::clone(&entry.session));
            }
            debug!(user = %user_id, "session inputs changed, rebuilding");
            inner.sessions.remove(user_id);
        }

        let session = Arc::new(SdkSession {
            user_id: user_id.clone(),
            user_key: snapshot.user_key,
            key_pair: snapshot.key_pair,
            org_keys: snapshot.org_keys,
            kdf: snapshot.kdf.unwrap_or_default(),
            generation: snapshot.generation,
        });
        inner.sessions.insert(
            user_id.clone(),
            SessionEntry {
                session: Arc::clone(&session),
                refs: 1,
            },
        );
        if inner.watched.insert(user_id.clone()) {
            self.spawn_watcher(user_id.clone());
        }
        Ok(session)
    }

    /// Release one reference. The session is dropped from the arena when
    /// the count reaches zero; key material is zeroized once the last
    /// outstanding `Arc` goes away.
    pub async fn release(&self, user_id: &UserId) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.get_mut(user_id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                inner.sessions.remove(user_id);
                debug!(user = %user_id, "session released");
            }
        }
    }

    /// Drop the user's session immediately, regardless of references.
    pub async fn invalidate(&self, user_id: &UserId) {
        let mut inner = self.inner.lock().await;
        if inner.sessions.remove(user_id).is_some() {
            debug!(user = %user_id, "session invalidated");
        }
    }

    /// Whether a live session exists for the user.
    pub async fn is_active(&self, user_id: &UserId) -> bool {
        self.inner.lock().await.sessions.contains_key(user_id)
    }

    // Tears the session down the instant the user key disappears. Exits
    // when that happens or when the bridge itself is dropped.
    fn spawn_watcher(self: &Arc<Self>, user_id: UserId) {
        let bridge = Arc::downgrade(self);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut rx = store.subscribe(&user_id).await;
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                if !rx.borrow_and_update().has_user_key {
                    let Some(bridge) = bridge.upgrade() else { return };
                    bridge.invalidate(&user_id).await;
                    bridge.inner.lock().await.watched.remove(&user_id);
                    return;
                }
            }
        });
    }
}
