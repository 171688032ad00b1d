//! Common error types for KeyFort.

use thiserror::Error;

/// Top-level error type for KeyFort operations.
///
/// Routine authentication outcomes (two-factor required, captcha required,
/// key migration required) are *not* errors; they are variants of
/// `AuthResult` in the auth crate. This enum covers genuine failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed (parameter or primitive failure).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Integrity failure: MAC mismatch, corrupted ciphertext, or a wrong
    /// key. Deliberately uniform so callers cannot distinguish a wrong
    /// password from a corrupted key.
    #[error("Cannot unlock: decryption failed")]
    DecryptionFailed,

    /// Authentication against the identity endpoint failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Invalid input provided (malformed envelope, out-of-bounds KDF
    /// parameters, empty credential fields).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A protocol precondition was violated (missing id, missing public
    /// key, request in the wrong state).
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// An auth request has already been approved or denied.
    #[error("Auth request already resolved")]
    AlreadyResolved,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
