//! Remember-token cache for second factors.
//!
//! Completing a second factor with `remember` set yields a long-lived
//! token the server accepts in place of a fresh factor. The cache keys
//! tokens by normalized email and treats anything past the validity
//! window as absent.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

/// How long a remember token is honored locally.
pub const REMEMBER_TOKEN_VALIDITY_DAYS: i64 = 30;

struct StoredToken {
    token: String,
    stored_at: DateTime<Utc>,
}

pub struct TwoFactorTokenCache {
    tokens: Mutex<HashMap<String, StoredToken>>,
    validity: Duration,
}

impl TwoFactorTokenCache {
    pub fn new() -> Self {
        Self::with_validity(Duration::days(REMEMBER_TOKEN_VALIDITY_DAYS))
    }

    pub fn with_validity(validity: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            validity,
        }
    }

    /// The remembered token for this email, if one exists and is still
    /// inside the validity window. Expired entries are removed.
    pub async fn get(&self, email: &str) -> Option<String> {
        let mut tokens = self.tokens.lock().await;
        let key = normalize(email);
        match tokens.get(&key) {
            Some(stored) if Utc::now() - stored.stored_at < self.validity => {
                Some(stored.token.clone())
            }
            Some(_) => {
                tokens.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, email: &str, token: String) {
        self.tokens.lock().await.insert(
            normalize(email),
            StoredToken {
                token,
                stored_at: Utc::now(),
            },
        );
    }

    /// Drop the remembered token, used when the server challenges anyway
    /// (a stale or revoked token must not be retried forever).
    pub async fn invalidate(&self, email: &str) {
        self.tokens.lock().await.remove(&normalize(email));
    }
}

impl Default for TwoFactorTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}
