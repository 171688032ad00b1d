//! In-memory key hierarchy state for KeyFort.
//!
//! This crate holds every unlocked account's key material — master key,
//! user key, organization keys, and RSA key pair — behind a single
//! [`KeyHierarchyStore`]. Consumers observe presence transitions through
//! watch channels rather than polling, and SDK-style session handles are
//! managed by [`SessionBridge`], which rebuilds or tears down sessions as
//! the underlying keys change.
//!
//! No key material in this crate ever touches disk; clearing a user's
//! state zeroizes it via the key types' drop implementations.

pub mod bulk;
pub mod session;
pub mod store;

pub use bulk::decrypt_all;
pub use session::{SdkSession, SessionBridge};
pub use store::{KeyHierarchyStore, KeyPresence, KeySnapshot, LoginKeys};
