//! Passwordless device approval.
//!
//! The requesting device generates an ephemeral RSA key pair and publishes
//! its public key through a broker. An already-unlocked device shows the
//! public key's fingerprint to the user and, on confirmation, sends key
//! material back wrapped under that public key: either the master key plus
//! its server hash, or the user key directly. The requester decrypts with
//! the ephemeral private key, which is destroyed as soon as the outcome is
//! known.
//!
//! A request resolves exactly once. Denial and expiry are deliberately
//! indistinguishable to the requester, so a watcher cannot tell whether a
//! human said no.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use keyfort_common::{Error, Result};
use keyfort_crypto::{
    fingerprint, rsa_decrypt, rsa_encrypt, EncString, KeyPair, MasterKey, UserKey,
};

use std::collections::HashMap;

/// How long a pending request stays approvable.
pub const AUTH_REQUEST_VALIDITY_MINUTES: i64 = 15;

const ACCESS_CODE_LENGTH: usize = 25;

/// Which key the approver chose to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovedKeyKind {
    MasterKey,
    UserKey,
}

/// Key material relayed on approval, wrapped under the requester's
/// ephemeral public key.
#[derive(Debug, Clone)]
pub struct ApprovalPayload {
    pub kind: ApprovedKeyKind,
    pub wrapped_key: EncString,
    /// Base64 server hash, present for master-key approvals so the
    /// requester can complete a password-grant login.
    pub wrapped_master_key_hash: Option<EncString>,
}

/// What the approving side sees before deciding.
#[derive(Debug, Clone)]
pub struct AuthRequestView {
    pub id: String,
    pub public_key_der: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Requester-visible state of a request.
#[derive(Debug, Clone)]
pub enum PollState {
    Pending,
    Approved(ApprovalPayload),
    /// Denied or expired; the two are indistinguishable by design.
    Refused,
}

pub enum Resolution {
    Approve(ApprovalPayload),
    Deny,
}

/// Transport between the requesting and approving devices.
#[async_trait]
pub trait AuthRequestBroker: Send + Sync {
    /// Publish a new request; returns its id.
    async fn create(&self, public_key_der: Vec<u8>, access_code: String) -> Result<String>;

    /// Fetch a request for the approving side.
    async fn view(&self, id: &str) -> Result<AuthRequestView>;

    /// Apply the single terminal transition.
    ///
    /// # Errors
    /// - `AlreadyResolved` when the request was already approved or denied
    /// - `Protocol` when the request has expired
    async fn resolve(&self, id: &str, resolution: Resolution) -> Result<()>;

    /// Current state as seen by the requester.
    async fn poll(&self, id: &str) -> Result<PollState>;
}

enum RequestState {
    Pending,
    Approved(ApprovalPayload),
    Denied,
}

struct PendingRequest {
    public_key_der: Vec<u8>,
    created_at: DateTime<Utc>,
    state: RequestState,
}

/// In-process broker, the default for tests and single-process setups.
pub struct MemoryAuthRequestBroker {
    requests: Mutex<HashMap<String, PendingRequest>>,
    validity: Duration,
}

impl MemoryAuthRequestBroker {
    pub fn new() -> Self {
        Self::with_validity(Duration::minutes(AUTH_REQUEST_VALIDITY_MINUTES))
    }

    pub fn with_validity(validity: Duration) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            validity,
        }
    }

    fn expired(&self, request: &PendingRequest) -> bool {
        Utc::now() - request.created_at >= self.validity
    }
}

impl Default for MemoryAuthRequestBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthRequestBroker for MemoryAuthRequestBroker {
    async fn create(&self, public_key_der: Vec<u8>, _access_code: String) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.requests.lock().await.insert(
            id.clone(),
            PendingRequest {
                public_key_der,
                created_at: Utc::now(),
                state: RequestState::Pending,
            },
        );
        debug!(request = %id, "auth request created");
        Ok(id)
    }

    async fn view(&self, id: &str) -> Result<AuthRequestView> {
        let requests = self.requests.lock().await;
        let request = requests
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("auth request {id}")))?;
        Ok(AuthRequestView {
            id: id.to_string(),
            public_key_der: request.public_key_der.clone(),
            created_at: request.created_at,
        })
    }

    async fn resolve(&self, id: &str, resolution: Resolution) -> Result<()> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("auth request {id}")))?;
        if !matches!(request.state, RequestState::Pending) {
            return Err(Error::AlreadyResolved);
        }
        if Utc::now() - request.created_at >= self.validity {
            return Err(Error::Protocol("auth request expired".to_string()));
        }
        request.state = match resolution {
            Resolution::Approve(payload) => RequestState::Approved(payload),
            Resolution::Deny => RequestState::Denied,
        };
        Ok(())
    }

    async fn poll(&self, id: &str) -> Result<PollState> {
        let requests = self.requests.lock().await;
        let request = requests
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("auth request {id}")))?;
        Ok(match &request.state {
            RequestState::Approved(payload) => PollState::Approved(payload.clone()),
            RequestState::Denied => PollState::Refused,
            RequestState::Pending if self.expired(request) => PollState::Refused,
            RequestState::Pending => PollState::Pending,
        })
    }
}

/// Keys recovered by an approved requester.
#[derive(Clone)]
pub enum RecoveredKeys {
    MasterKey {
        master_key: MasterKey,
        master_key_hash_b64: Option<String>,
    },
    UserKey(UserKey),
}

impl std::fmt::Debug for RecoveredKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MasterKey { .. } => f.write_str("RecoveredKeys::MasterKey([REDACTED])"),
            Self::UserKey(_) => f.write_str("RecoveredKeys::UserKey([REDACTED])"),
        }
    }
}

#[derive(Debug)]
pub enum AuthRequestOutcome {
    Approved(RecoveredKeys),
    Refused,
}

/// Requester side: one pending request and its ephemeral key pair.
pub struct AuthRequestSession {
    id: String,
    access_code: String,
    key_pair: KeyPair,
    broker: Arc<dyn AuthRequestBroker>,
}

impl AuthRequestSession {
    /// Generate an ephemeral key pair and publish a new request.
    pub async fn start(broker: Arc<dyn AuthRequestBroker>) -> Result<Self> {
        let key_pair = tokio::task::spawn_blocking(KeyPair::generate)
            .await
            .map_err(|e| Error::Crypto(format!("keygen task: {e}")))??;
        let access_code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ACCESS_CODE_LENGTH)
            .map(char::from)
            .collect();
        let id = broker
            .create(key_pair.public_der().to_vec(), access_code.clone())
            .await?;
        info!(request = %id, "device approval requested");
        Ok(Self {
            id,
            access_code,
            key_pair,
            broker,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// One-time code usable as the credential for the follow-up login.
    pub fn access_code(&self) -> &str {
        &self.access_code
    }

    /// Human-checkable fingerprint of the ephemeral public key. The
    /// approving device derives the same value independently; the user
    /// compares the two before approving.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.key_pair.public_der())
    }

    /// Poll until the request resolves.
    ///
    /// Consumes the session: the ephemeral private key is dropped (and
    /// zeroized) when this returns, whatever the outcome.
    pub async fn await_outcome(
        self,
        poll_interval: std::time::Duration,
    ) -> Result<AuthRequestOutcome> {
        loop {
            match self.broker.poll(&self.id).await? {
                PollState::Pending => tokio::time::sleep(poll_interval).await,
                PollState::Refused => {
                    info!(request = %self.id, "device approval refused");
                    return Ok(AuthRequestOutcome::Refused);
                }
                PollState::Approved(payload) => {
                    info!(request = %self.id, "device approval granted");
                    return self.recover(&payload).map(AuthRequestOutcome::Approved);
                }
            }
        }
    }

    fn recover(&self, payload: &ApprovalPayload) -> Result<RecoveredKeys> {
        let raw = rsa_decrypt(&payload.wrapped_key, self.key_pair.private_der())?;
        match payload.kind {
            ApprovedKeyKind::MasterKey => {
                let bytes: [u8; 32] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Crypto("approved master key must be 32 bytes".to_string()))?;
                let master_key_hash_b64 = match &payload.wrapped_master_key_hash {
                    Some(wrapped) => {
                        let hash = rsa_decrypt(wrapped, self.key_pair.private_der())?;
                        Some(String::from_utf8(hash.to_vec()).map_err(|_| {
                            Error::Crypto("approved hash is not valid UTF-8".to_string())
                        })?)
                    }
                    None => None,
                };
                Ok(RecoveredKeys::MasterKey {
                    master_key: MasterKey::from_bytes(bytes),
                    master_key_hash_b64,
                })
            }
            ApprovedKeyKind::UserKey => Ok(RecoveredKeys::UserKey(UserKey::from_bytes(&raw)?)),
        }
    }
}

fn verify_fingerprint(view: &AuthRequestView, confirmed_fingerprint: &str) -> Result<()> {
    if fingerprint(&view.public_key_der) != confirmed_fingerprint {
        return Err(Error::Authentication(
            "auth request fingerprint mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Approve from a device that holds the master key.
///
/// `confirmed_fingerprint` is the fingerprint the user visually confirmed;
/// it is re-derived from the published public key before anything is sent.
pub async fn approve_with_master_key(
    broker: &dyn AuthRequestBroker,
    id: &str,
    confirmed_fingerprint: &str,
    master_key: &MasterKey,
    server_hash_b64: &str,
) -> Result<()> {
    let view = broker.view(id).await?;
    verify_fingerprint(&view, confirmed_fingerprint)?;
    let payload = ApprovalPayload {
        kind: ApprovedKeyKind::MasterKey,
        wrapped_key: rsa_encrypt(master_key.as_bytes(), &view.public_key_der)?,
        wrapped_master_key_hash: Some(rsa_encrypt(
            server_hash_b64.as_bytes(),
            &view.public_key_der,
        )?),
    };
    broker.resolve(id, Resolution::Approve(payload)).await
}

/// Approve from a device that holds only the user key (no master
/// password on the account).
pub async fn approve_with_user_key(
    broker: &dyn AuthRequestBroker,
    id: &str,
    confirmed_fingerprint: &str,
    user_key: &UserKey,
) -> Result<()> {
    let view = broker.view(id).await?;
    verify_fingerprint(&view, confirmed_fingerprint)?;
    let payload = ApprovalPayload {
        kind: ApprovedKeyKind::UserKey,
        wrapped_key: rsa_encrypt(user_key.key().as_bytes(), &view.public_key_der)?,
        wrapped_master_key_hash: None,
    };
    broker.resolve(id, Resolution::Approve(payload)).await
}

/// Deny the request. Terminal, like approval.
pub async fn deny(broker: &dyn AuthRequestBroker, id: &str) -> Result<()> {
    broker.resolve(id, Resolution::Deny).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use keyfort_crypto::{decrypt_aes, derive_master_key, encrypt_aes, HashPurpose, KdfConfig};
    use keyfort_keystore::KeyHierarchyStore;

    const POLL: StdDuration = StdDuration::from_millis(5);

    fn kdf() -> KdfConfig {
        KdfConfig::Pbkdf2 {
            iterations: keyfort_crypto::kdf::PBKDF2_MIN_ITERATIONS,
        }
    }

    #[tokio::test]
    async fn test_master_key_approval_recovers_vault_access() {
        let broker: Arc<dyn AuthRequestBroker> = Arc::new(MemoryAuthRequestBroker::new());

        // approving device state: unlocked account with a wrapped user key
        let master = derive_master_key(b"correct-horse", "user@example.com", &kdf()).unwrap();
        let user_key = UserKey::generate();
        let wrapped_user_key =
            encrypt_aes(user_key.key().as_bytes(), &master.expand().unwrap()).unwrap();
        let server_hash = master
            .hash(b"correct-horse", HashPurpose::ServerAuthorization)
            .to_b64();
        let secret = encrypt_aes(b"vault item", user_key.key()).unwrap();

        let session = AuthRequestSession::start(Arc::clone(&broker)).await.unwrap();
        let fp = session.fingerprint();
        let id = session.id().to_string();

        approve_with_master_key(broker.as_ref(), &id, &fp, &master, &server_hash)
            .await
            .unwrap();

        let outcome = session.await_outcome(POLL).await.unwrap();
        let AuthRequestOutcome::Approved(RecoveredKeys::MasterKey {
            master_key,
            master_key_hash_b64,
        }) = outcome
        else {
            panic!("expected master key approval");
        };

        // the recovered master key opens the same vault
        assert_eq!(master_key.as_bytes(), master.as_bytes());
        assert_eq!(master_key_hash_b64.as_deref(), Some(server_hash.as_str()));
        let recovered_user_key =
            KeyHierarchyStore::unwrap_user_key(&wrapped_user_key, &master_key).unwrap();
        let plaintext = decrypt_aes(&secret, recovered_user_key.key()).unwrap();
        assert_eq!(plaintext.as_slice(), b"vault item");
    }

    #[tokio::test]
    async fn test_user_key_approval() {
        let broker: Arc<dyn AuthRequestBroker> = Arc::new(MemoryAuthRequestBroker::new());
        let user_key = UserKey::generate();
        let secret = encrypt_aes(b"vault item", user_key.key()).unwrap();

        let session = AuthRequestSession::start(Arc::clone(&broker)).await.unwrap();
        let fp = session.fingerprint();
        let id = session.id().to_string();

        approve_with_user_key(broker.as_ref(), &id, &fp, &user_key)
            .await
            .unwrap();

        let outcome = session.await_outcome(POLL).await.unwrap();
        let AuthRequestOutcome::Approved(RecoveredKeys::UserKey(recovered)) = outcome else {
            panic!("expected user key approval");
        };
        let plaintext = decrypt_aes(&secret, recovered.key()).unwrap();
        assert_eq!(plaintext.as_slice(), b"vault item");
    }

    #[tokio::test]
    async fn test_denial_is_terminal() {
        let broker: Arc<dyn AuthRequestBroker> = Arc::new(MemoryAuthRequestBroker::new());
        let session = AuthRequestSession::start(Arc::clone(&broker)).await.unwrap();
        let fp = session.fingerprint();
        let id = session.id().to_string();

        deny(broker.as_ref(), &id).await.unwrap();
        assert!(matches!(
            session.await_outcome(POLL).await.unwrap(),
            AuthRequestOutcome::Refused
        ));

        // no approval can follow a denial
        let user_key = UserKey::generate();
        let err = approve_with_user_key(broker.as_ref(), &id, &fp, &user_key)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyResolved));
    }

    #[tokio::test]
    async fn test_second_resolution_rejected() {
        let broker: Arc<dyn AuthRequestBroker> = Arc::new(MemoryAuthRequestBroker::new());
        let session = AuthRequestSession::start(Arc::clone(&broker)).await.unwrap();
        let fp = session.fingerprint();
        let id = session.id().to_string();
        let user_key = UserKey::generate();

        approve_with_user_key(broker.as_ref(), &id, &fp, &user_key)
            .await
            .unwrap();
        let err = deny(broker.as_ref(), &id).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyResolved));
    }

    #[tokio::test]
    async fn test_expired_request_is_refused() {
        let broker: Arc<dyn AuthRequestBroker> =
            Arc::new(MemoryAuthRequestBroker::with_validity(Duration::zero()));
        let session = AuthRequestSession::start(Arc::clone(&broker)).await.unwrap();
        let fp = session.fingerprint();
        let id = session.id().to_string();

        // expiry and denial look identical to the requester
        assert!(matches!(
            session.await_outcome(POLL).await.unwrap(),
            AuthRequestOutcome::Refused
        ));

        // and can no longer be approved
        let user_key = UserKey::generate();
        let err = approve_with_user_key(broker.as_ref(), &id, &fp, &user_key)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_wrong_fingerprint_blocks_approval() {
        let broker: Arc<dyn AuthRequestBroker> = Arc::new(MemoryAuthRequestBroker::new());
        let session = AuthRequestSession::start(Arc::clone(&broker)).await.unwrap();
        let id = session.id().to_string();

        let user_key = UserKey::generate();
        let err = approve_with_user_key(broker.as_ref(), &id, "00000000-wrong", &user_key)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));

        // the request stays pending and can still be approved correctly
        let fp = session.fingerprint();
        approve_with_user_key(broker.as_ref(), &id, &fp, &user_key)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_approve_and_deny_single_winner() {
        let broker = Arc::new(MemoryAuthRequestBroker::new());
        let session = AuthRequestSession::start(broker.clone() as Arc<dyn AuthRequestBroker>)
            .await
            .unwrap();
        let fp = session.fingerprint();
        let id = session.id().to_string();
        let user_key = UserKey::generate();

        let approve = {
            let broker = Arc::clone(&broker);
            let (id, fp, user_key) = (id.clone(), fp.clone(), user_key.clone());
            tokio::spawn(async move {
                approve_with_user_key(broker.as_ref(), &id, &fp, &user_key).await
            })
        };
        let deny_task = {
            let broker = Arc::clone(&broker);
            let id = id.clone();
            tokio::spawn(async move { deny(broker.as_ref(), &id).await })
        };

        let (a, d) = (approve.await.unwrap(), deny_task.await.unwrap());
        // exactly one transition wins
        assert!(a.is_ok() ^ d.is_ok());
    }
}
