//! Cryptographic primitives for KeyFort.
//!
//! This module provides:
//! - Master key derivation (PBKDF2-HMAC-SHA256 or Argon2id) with enforced
//!   parameter bounds
//! - Authenticated symmetric encryption (AES-256-CBC + HMAC-SHA256) in a
//!   versioned `EncString` envelope
//! - RSA-OAEP key wrapping for sharing keys between users and devices
//! - The key hierarchy types: MasterKey, UserKey, OrgKey, KeyPair
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - MACs are verified before any ciphertext is trusted; failures are
//!   fail-closed
//! - Constant-time operations for sensitive comparisons

pub mod cipher;
pub mod enc_string;
pub mod kdf;
pub mod keys;

pub use cipher::{
    decrypt_aes, encrypt_aes, fingerprint, hash, rewrap_user_key, rsa_decrypt, rsa_encrypt,
    HashAlgorithm,
};
pub use enc_string::EncString;
pub use kdf::{derive_master_key, HashPurpose, KdfConfig};
pub use keys::{KeyPair, MasterKey, MasterKeyHash, OrgKey, SymmetricKey, UserKey};
