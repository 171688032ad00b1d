//! Master key derivation from a password and account email.
//!
//! Two algorithms are supported: PBKDF2-HMAC-SHA256 and Argon2id. The
//! algorithm and its parameters travel together as a `KdfConfig`, which is
//! validated against enforced bounds before any derivation runs. Derivation
//! is deterministic: the same (password, email, config) triple always yields
//! the same key, which is what allows login to succeed against a
//! server-stored hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::keys::{MasterKey, KEY_LENGTH};
use keyfort_common::{Error, Result};

/// Minimum PBKDF2 iteration count accepted for derivation.
pub const PBKDF2_MIN_ITERATIONS: u32 = 100_000;
/// Maximum PBKDF2 iteration count accepted for derivation.
pub const PBKDF2_MAX_ITERATIONS: u32 = 2_000_000;
/// Default PBKDF2 iteration count for new accounts.
pub const PBKDF2_DEFAULT_ITERATIONS: u32 = 600_000;

/// Argon2id iteration bounds.
pub const ARGON2_MIN_ITERATIONS: u32 = 2;
pub const ARGON2_MAX_ITERATIONS: u32 = 10;
/// Argon2id memory bounds, in MiB.
pub const ARGON2_MIN_MEMORY_MIB: u32 = 16;
pub const ARGON2_MAX_MEMORY_MIB: u32 = 1024;
/// Argon2id parallelism bounds.
pub const ARGON2_MIN_PARALLELISM: u32 = 1;
pub const ARGON2_MAX_PARALLELISM: u32 = 16;

/// KDF algorithm selection plus algorithm-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "camelCase")]
pub enum KdfConfig {
    /// PBKDF2-HMAC-SHA256.
    #[serde(rename_all = "camelCase")]
    Pbkdf2 { iterations: u32 },
    /// Argon2id, memory given in MiB.
    #[serde(rename_all = "camelCase")]
    Argon2id {
        iterations: u32,
        memory_mib: u32,
        parallelism: u32,
    },
}

impl KdfConfig {
    /// Default configuration for new accounts.
    pub fn default_pbkdf2() -> Self {
        Self::Pbkdf2 {
            iterations: PBKDF2_DEFAULT_ITERATIONS,
        }
    }

    /// Default Argon2id configuration.
    pub fn default_argon2id() -> Self {
        Self::Argon2id {
            iterations: 3,
            memory_mib: 64,
            parallelism: 4,
        }
    }

    /// Validate parameters against the enforced bounds.
    ///
    /// Fails fast rather than silently clamping: a config outside bounds is
    /// rejected before any derivation runs.
    ///
    /// # Errors
    /// - `InvalidInput` naming the out-of-bounds parameter
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Pbkdf2 { iterations } => {
                if !(PBKDF2_MIN_ITERATIONS..=PBKDF2_MAX_ITERATIONS).contains(&iterations) {
                    return Err(Error::InvalidInput(format!(
                        "PBKDF2 iterations must be between {PBKDF2_MIN_ITERATIONS} and {PBKDF2_MAX_ITERATIONS}, got {iterations}"
                    )));
                }
            }
            Self::Argon2id {
                iterations,
                memory_mib,
                parallelism,
            } => {
                if !(ARGON2_MIN_ITERATIONS..=ARGON2_MAX_ITERATIONS).contains(&iterations) {
                    return Err(Error::InvalidInput(format!(
                        "Argon2 iterations must be between {ARGON2_MIN_ITERATIONS} and {ARGON2_MAX_ITERATIONS}, got {iterations}"
                    )));
                }
                if !(ARGON2_MIN_MEMORY_MIB..=ARGON2_MAX_MEMORY_MIB).contains(&memory_mib) {
                    return Err(Error::InvalidInput(format!(
                        "Argon2 memory must be between {ARGON2_MIN_MEMORY_MIB} and {ARGON2_MAX_MEMORY_MIB} MiB, got {memory_mib}"
                    )));
                }
                if !(ARGON2_MIN_PARALLELISM..=ARGON2_MAX_PARALLELISM).contains(&parallelism) {
                    return Err(Error::InvalidInput(format!(
                        "Argon2 parallelism must be between {ARGON2_MIN_PARALLELISM} and {ARGON2_MAX_PARALLELISM}, got {parallelism}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self::default_pbkdf2()
    }
}

/// Purpose of a master key hash, encoded as the PBKDF2 round count used to
/// derive it. The server-authorization hash is what travels on the wire;
/// the local-authorization hash never leaves the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashPurpose {
    ServerAuthorization,
    LocalAuthorization,
}

impl HashPurpose {
    pub(crate) fn rounds(self) -> u32 {
        match self {
            Self::ServerAuthorization => 1,
            Self::LocalAuthorization => 2,
        }
    }
}

/// Derive the 32-byte master key from password + email.
///
/// The email is normalized (trimmed, lowercased) before use as the salt so
/// that differing capitalization at login time cannot produce a different
/// key. For Argon2id the salt is SHA-256 of the normalized email, since
/// Argon2 requires a fixed-length salt.
///
/// # Preconditions
/// - `password` and `email` must be non-empty
/// - `config` must pass `validate()`
///
/// # Postconditions
/// - Deterministic: identical inputs yield a bit-identical MasterKey
///
/// # Errors
/// - `InvalidInput` for empty inputs or out-of-bounds parameters
/// - `Crypto` if the underlying primitive rejects the parameters
pub fn derive_master_key(password: &[u8], email: &str, config: &KdfConfig) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    let email_lower = email.trim().to_lowercase();
    if email_lower.is_empty() {
        return Err(Error::InvalidInput("Email cannot be empty".to_string()));
    }
    config.validate()?;

    let mut key_bytes = Zeroizing::new([0u8; KEY_LENGTH]);

    match *config {
        KdfConfig::Pbkdf2 { iterations } => {
            pbkdf2::pbkdf2_hmac::<Sha256>(
                password,
                email_lower.as_bytes(),
                iterations,
                key_bytes.as_mut(),
            );
        }
        KdfConfig::Argon2id {
            iterations,
            memory_mib,
            parallelism,
        } => {
            let salt = Sha256::digest(email_lower.as_bytes());

            let params = argon2::Params::new(
                memory_mib * 1024, // MiB -> KiB
                iterations,
                parallelism,
                Some(KEY_LENGTH),
            )
            .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {e}")))?;

            let argon2 =
                argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

            argon2
                .hash_password_into(password, &salt, key_bytes.as_mut())
                .map_err(|e| Error::Crypto(format!("Key derivation failed: {e}")))?;
        }
    }

    Ok(MasterKey::from_bytes(*key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let config = KdfConfig::Pbkdf2 {
            iterations: PBKDF2_MIN_ITERATIONS,
        };

        let key1 = derive_master_key(b"correct-horse", "user@example.com", &config).unwrap();
        let key2 = derive_master_key(b"correct-horse", "user@example.com", &config).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_email_is_normalized() {
        let config = KdfConfig::Pbkdf2 {
            iterations: PBKDF2_MIN_ITERATIONS,
        };

        let k1 = derive_master_key(b"pw", "User@Example.COM", &config).unwrap();
        let k2 = derive_master_key(b"pw", "user@example.com", &config).unwrap();
        let k3 = derive_master_key(b"pw", "  user@example.com  ", &config).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_eq!(k2.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn test_different_password_different_key() {
        let config = KdfConfig::Pbkdf2 {
            iterations: PBKDF2_MIN_ITERATIONS,
        };

        let k1 = derive_master_key(b"password1", "user@example.com", &config).unwrap();
        let k2 = derive_master_key(b"password2", "user@example.com", &config).unwrap();

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_argon2id_derivation() {
        let config = KdfConfig::Argon2id {
            iterations: 2,
            memory_mib: 16,
            parallelism: 1,
        };

        let k1 = derive_master_key(b"pw", "user@example.com", &config).unwrap();
        let k2 = derive_master_key(b"pw", "user@example.com", &config).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());

        let pbkdf2 = KdfConfig::Pbkdf2 {
            iterations: PBKDF2_MIN_ITERATIONS,
        };
        let k3 = derive_master_key(b"pw", "user@example.com", &pbkdf2).unwrap();
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn test_pbkdf2_bounds_rejected() {
        for iterations in [0, PBKDF2_MIN_ITERATIONS - 1, PBKDF2_MAX_ITERATIONS + 1] {
            let config = KdfConfig::Pbkdf2 { iterations };
            assert!(config.validate().is_err(), "iterations {iterations} accepted");
            assert!(derive_master_key(b"pw", "a@b.c", &config).is_err());
        }
        assert!(KdfConfig::Pbkdf2 {
            iterations: PBKDF2_MIN_ITERATIONS
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_argon2_bounds_rejected() {
        let bad_configs = [
            KdfConfig::Argon2id {
                iterations: 1,
                memory_mib: 64,
                parallelism: 4,
            },
            KdfConfig::Argon2id {
                iterations: 11,
                memory_mib: 64,
                parallelism: 4,
            },
            KdfConfig::Argon2id {
                iterations: 3,
                memory_mib: 8,
                parallelism: 4,
            },
            KdfConfig::Argon2id {
                iterations: 3,
                memory_mib: 2048,
                parallelism: 4,
            },
            KdfConfig::Argon2id {
                iterations: 3,
                memory_mib: 64,
                parallelism: 0,
            },
            KdfConfig::Argon2id {
                iterations: 3,
                memory_mib: 64,
                parallelism: 17,
            },
        ];
        for config in bad_configs {
            assert!(config.validate().is_err(), "{config:?} accepted");
        }
        assert!(KdfConfig::default_argon2id().validate().is_ok());
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let config = KdfConfig::default_pbkdf2();
        assert!(derive_master_key(b"", "user@example.com", &config).is_err());
        assert!(derive_master_key(b"pw", "", &config).is_err());
        assert!(derive_master_key(b"pw", "   ", &config).is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = KdfConfig::Argon2id {
            iterations: 3,
            memory_mib: 64,
            parallelism: 4,
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: KdfConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
