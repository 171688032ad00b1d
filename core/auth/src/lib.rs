//! Authentication flows for KeyFort.
//!
//! This crate turns credentials into unlocked key state:
//! - [`login::LoginStrategy`] drives the identity-token exchange for every
//!   credential kind (password, SSO, API key, device approval, WebAuthn),
//!   including two-factor and captcha challenge replays
//! - [`auth_request`] implements passwordless device approval: an ephemeral
//!   RSA key pair on the requesting device, fingerprint confirmation on the
//!   approving device, and key material relayed wrapped under the ephemeral
//!   public key
//! - [`rotate`] re-wraps the user key under new KDF parameters as a single
//!   atomic persistence step
//!
//! Successful logins commit their keys to the
//! [`KeyHierarchyStore`](keyfort_keystore::KeyHierarchyStore) in one
//! transition and publish a [`LifecycleEvent`](events::LifecycleEvent).

pub mod accounts;
pub mod api;
pub mod auth_request;
pub mod events;
pub mod http;
pub mod jwt;
pub mod login;
pub mod rotate;
pub mod two_factor;

#[cfg(test)]
pub(crate) mod testutil;

pub use accounts::{AccountProfile, AccountStore, MemoryAccountStore};
pub use api::{
    DeviceInfo, Grant, IdentityClient, IdentityResponse, TokenRequest, TokenResponse,
    TwoFactorProof, TwoFactorProviderType,
};
pub use auth_request::{
    approve_with_master_key, approve_with_user_key, deny, AuthRequestBroker, AuthRequestOutcome,
    AuthRequestSession, MemoryAuthRequestBroker, RecoveredKeys,
};
pub use events::{EventBus, LifecycleEvent};
pub use http::HttpIdentityClient;
pub use login::{
    lock, logout, AuthResult, ClientRole, LoginContext, LoginMethod, LoginStrategy,
    MigrationPolicy,
};
pub use rotate::rotate_kdf;
pub use two_factor::TwoFactorTokenCache;
