//! Key hierarchy types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop. The hierarchy
//! is: MasterKey (derived from the password) wraps the UserKey; the UserKey
//! wraps the RSA private key; organization keys are RSA-wrapped under each
//! member's public key.

use hkdf::Hkdf;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::enc_string::EncString;
use crate::kdf::HashPurpose;
use keyfort_common::{Error, Result};

/// Length of a single symmetric key half in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// A symmetric key: either a 64-byte encryption + MAC pair, or a legacy
/// 32-byte key with no distinct MAC half.
///
/// Which half of the key applies to a given ciphertext is decided by the
/// envelope's declared algorithm, never guessed; see `cipher::decrypt_aes`.
#[derive(Clone)]
pub struct SymmetricKey {
    data: Zeroizing<Vec<u8>>,
}

impl SymmetricKey {
    /// Create from raw key material (32 or 64 bytes).
    ///
    /// # Errors
    /// - `Crypto` if the length is neither 32 nor 64
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH && bytes.len() != 2 * KEY_LENGTH {
            return Err(Error::Crypto(format!(
                "expected 32- or 64-byte key, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            data: Zeroizing::new(bytes.to_vec()),
        })
    }

    /// Generate a random 64-byte key (encryption + MAC halves).
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; 2 * KEY_LENGTH]);
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { data: bytes }
    }

    /// The 32-byte encryption key half.
    pub fn enc_key(&self) -> &[u8] {
        &self.data[..KEY_LENGTH]
    }

    /// The 32-byte MAC key half, absent for legacy 32-byte keys.
    pub fn mac_key(&self) -> Option<&[u8]> {
        if self.data.len() == 2 * KEY_LENGTH {
            Some(&self.data[KEY_LENGTH..])
        } else {
            None
        }
    }

    /// The full key material, for wrapping under another key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED; {} bytes])", self.data.len())
    }
}

/// Master key derived from the user's password.
///
/// Never persisted; lives only for the duration of an unlocked session.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Expand into a 64-byte encryption + MAC pair via HKDF-SHA256.
    ///
    /// The master key is already uniform keying material, so it is used as
    /// the PRK directly with `enc` / `mac` info strings.
    pub fn expand(&self) -> Result<SymmetricKey> {
        let hkdf = Hkdf::<Sha256>::from_prk(&self.key)
            .map_err(|e| Error::Crypto(format!("HKDF from_prk: {e}")))?;

        let mut combined = Zeroizing::new(vec![0u8; 2 * KEY_LENGTH]);
        hkdf.expand(b"enc", &mut combined[..KEY_LENGTH])
            .map_err(|e| Error::Crypto(format!("HKDF expand enc: {e}")))?;
        hkdf.expand(b"mac", &mut combined[KEY_LENGTH..])
            .map_err(|e| Error::Crypto(format!("HKDF expand mac: {e}")))?;

        SymmetricKey::from_bytes(&combined)
    }

    /// Derive the keyed password hash for the given purpose.
    ///
    /// `PBKDF2-HMAC-SHA256(password=master_key, salt=raw_password, rounds)`
    /// where the round count encodes the purpose. The server-authorization
    /// hash is what gets sent for password verification; the server never
    /// sees the master key itself.
    pub fn hash(&self, password: &[u8], purpose: HashPurpose) -> MasterKeyHash {
        let mut hash = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.key, password, purpose.rounds(), &mut hash);
        MasterKeyHash(hash)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Keyed hash of the master key, distinct from the key itself.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct MasterKeyHash([u8; KEY_LENGTH]);

impl MasterKeyHash {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the hash bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Base64 form, as sent to the identity endpoint.
    pub fn to_b64(&self) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        STANDARD.encode(self.0)
    }

    /// Constant-time equality check.
    pub fn verify(&self, other: &MasterKeyHash) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Debug for MasterKeyHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKeyHash([REDACTED])")
    }
}

/// The key that (directly or via item keys) decrypts one user's vault.
#[derive(Clone, Debug)]
pub struct UserKey(SymmetricKey);

impl UserKey {
    /// Wrap an existing symmetric key.
    pub fn new(key: SymmetricKey) -> Self {
        Self(key)
    }

    /// Generate a fresh random user key.
    pub fn generate() -> Self {
        Self(SymmetricKey::generate())
    }

    /// Create from raw key material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(SymmetricKey::from_bytes(bytes)?))
    }

    /// Reinterpret a master key as a legacy 32-byte user key.
    ///
    /// One-way transitional support for accounts that predate the
    /// master-key/user-key split; the reverse direction never happens.
    pub fn from_master_legacy(master_key: &MasterKey) -> Self {
        // from_bytes cannot fail for a 32-byte input
        Self(SymmetricKey::from_bytes(master_key.as_bytes()).expect("32-byte key"))
    }

    /// The underlying symmetric key.
    pub fn key(&self) -> &SymmetricKey {
        &self.0
    }
}

/// Per-organization symmetric key, distributed to members RSA-wrapped
/// under each member's public key.
#[derive(Clone, Debug)]
pub struct OrgKey(SymmetricKey);

impl OrgKey {
    pub fn new(key: SymmetricKey) -> Self {
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(SymmetricKey::from_bytes(bytes)?))
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.0
    }
}

/// RSA key pair used to share secrets without the recipient's password.
///
/// The private key is held in DER (PKCS#8) form and zeroized on drop; for
/// storage or transport it is wrapped under the UserKey.
pub struct KeyPair {
    private_der: Zeroizing<Vec<u8>>,
    public_der: Vec<u8>,
}

/// RSA modulus size for generated key pairs.
const RSA_BITS: usize = 2048;

impl KeyPair {
    /// Generate a fresh 2048-bit RSA key pair.
    ///
    /// CPU-bound; callers on an async runtime should run this on a
    /// blocking thread.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| Error::Crypto(format!("RSA keygen: {e}")))?;
        Self::from_private(&private)
    }

    /// Reconstruct from a PKCS#8 DER private key.
    pub fn from_private_der(private_der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(private_der)
            .map_err(|e| Error::Crypto(format!("PKCS#8 parse: {e}")))?;
        Self::from_private(&private)
    }

    fn from_private(private: &RsaPrivateKey) -> Result<Self> {
        let private_der = private
            .to_pkcs8_der()
            .map_err(|e| Error::Crypto(format!("PKCS#8 encode: {e}")))?;
        let public_der = private
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::Crypto(format!("SPKI encode: {e}")))?;
        Ok(Self {
            private_der: Zeroizing::new(private_der.as_bytes().to_vec()),
            public_der: public_der.as_bytes().to_vec(),
        })
    }

    /// The private key in PKCS#8 DER form.
    pub fn private_der(&self) -> &[u8] {
        &self.private_der
    }

    /// The public key in SPKI DER form.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Wrap the private key under the user key for storage/transport.
    pub fn wrap_private(&self, user_key: &UserKey) -> Result<EncString> {
        crate::cipher::encrypt_aes(&self.private_der, user_key.key())
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            private_der: Zeroizing::new(self.private_der.to_vec()),
            public_der: self.public_der.clone(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyPair([REDACTED private], public)")
    }
}

/// Generate a key pair and return (public DER, user-key-wrapped private).
///
/// This is the shape the account-keys endpoint expects when provisioning
/// a key pair for an account that predates asymmetric sharing.
pub fn make_key_pair(user_key: &UserKey) -> Result<(Vec<u8>, EncString)> {
    let pair = KeyPair::generate()?;
    let wrapped = pair.wrap_private(user_key)?;
    Ok((pair.public_der().to_vec(), wrapped))
}
