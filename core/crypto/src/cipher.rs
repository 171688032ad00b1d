//! Authenticated symmetric and asymmetric cipher operations.
//!
//! Symmetric encryption is AES-256-CBC with an HMAC-SHA256 over
//! IV‖ciphertext; the MAC is verified before any ciphertext is trusted and
//! failures are fail-closed. Asymmetric operations are RSA-2048-OAEP-SHA1,
//! used only for key wrapping since the payload size is bounded.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::enc_string::{EncString, IV_LENGTH};
use crate::keys::{MasterKey, SymmetricKey};
use keyfort_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt plaintext under a symmetric key, producing a tag-2 envelope.
///
/// # Preconditions
/// - `key` must carry a MAC half (64-byte key); new data is never written
///   without authentication
///
/// # Postconditions
/// - A fresh random 16-byte IV is generated per call, never reused
/// - The MAC covers IV‖ciphertext
///
/// # Errors
/// - `Crypto` if the key has no MAC half
pub fn encrypt_aes(plaintext: &[u8], key: &SymmetricKey) -> Result<EncString> {
    let mac_key = key
        .mac_key()
        .ok_or_else(|| Error::Crypto("refusing to encrypt without a MAC key".to_string()))?;

    let mut iv = vec![0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);

    let pad_len = IV_LENGTH - (plaintext.len() % IV_LENGTH);
    let mut buf = Zeroizing::new(vec![0u8; plaintext.len() + pad_len]);
    buf[..plaintext.len()].copy_from_slice(plaintext);

    let encryptor = Aes256CbcEnc::new_from_slices(key.enc_key(), &iv)
        .map_err(|e| Error::Crypto(format!("AES init: {e}")))?;
    let data = encryptor
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
        .map_err(|e| Error::Crypto(format!("AES encrypt: {e}")))?
        .to_vec();

    let mut hmac = HmacSha256::new_from_slice(mac_key)
        .map_err(|e| Error::Crypto(format!("HMAC init: {e}")))?;
    hmac.update(&iv);
    hmac.update(&data);
    let mac = hmac.finalize().into_bytes().to_vec();

    Ok(EncString::AesCbc256HmacSha256 { iv, data, mac })
}

/// Decrypt a symmetric envelope, verifying the MAC first.
///
/// Key material is selected by the envelope's declared algorithm, never
/// guessed: a tag-2 envelope requires a key with a MAC half, and a legacy
/// tag-0 envelope requires a legacy 32-byte key.
///
/// # Errors
/// - `Crypto` when the envelope and key shape disagree (caller bug or
///   record/key mismatch)
/// - `DecryptionFailed` on MAC mismatch or undecryptable ciphertext; the
///   error is uniform so wrong-key and corrupted-data cases are
///   indistinguishable
pub fn decrypt_aes(enc: &EncString, key: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>> {
    match enc {
        EncString::AesCbc256HmacSha256 { iv, data, mac } => {
            let mac_key = key.mac_key().ok_or_else(|| {
                Error::Crypto("envelope requires a MAC key, but key has none".to_string())
            })?;

            // hmac's verify_slice is constant-time
            let mut hmac = HmacSha256::new_from_slice(mac_key)
                .map_err(|e| Error::Crypto(format!("HMAC init: {e}")))?;
            hmac.update(iv);
            hmac.update(data);
            hmac.verify_slice(mac).map_err(|_| Error::DecryptionFailed)?;

            decrypt_cbc(key.enc_key(), iv, data)
        }
        EncString::AesCbc256 { iv, data } => {
            if key.mac_key().is_some() {
                return Err(Error::Crypto(
                    "legacy envelope cannot be decrypted with an enc+MAC key".to_string(),
                ));
            }
            decrypt_cbc(key.enc_key(), iv, data)
        }
        EncString::Rsa2048OaepSha1 { .. } => Err(Error::Crypto(
            "cannot decrypt asymmetric envelope with a symmetric key".to_string(),
        )),
    }
}

fn decrypt_cbc(enc_key: &[u8], iv: &[u8], data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    // buf holds plaintext after in-place decryption, so it is Zeroizing
    let mut buf = Zeroizing::new(data.to_vec());
    let decryptor = Aes256CbcDec::new_from_slices(enc_key, iv)
        .map_err(|e| Error::Crypto(format!("AES init: {e}")))?;
    let plaintext = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| Error::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext.to_vec()))
}

/// Re-wrap a master-key-wrapped user key under a different master key.
///
/// The building block for KDF rotation: the user key itself is unchanged,
/// only its wrapping moves from the old stretched master key to the new
/// one.
///
/// # Errors
/// - `DecryptionFailed` when the old master key does not open the wrapped
///   key (uniform, no oracle)
pub fn rewrap_user_key(
    wrapped: &EncString,
    old_master: &MasterKey,
    new_master: &MasterKey,
) -> Result<EncString> {
    let old_stretched = old_master.expand().map_err(|_| Error::DecryptionFailed)?;
    let raw = decrypt_aes(wrapped, &old_stretched).map_err(|_| Error::DecryptionFailed)?;
    encrypt_aes(&raw, &new_master.expand()?)
}

/// Wrap bytes under an RSA public key (SPKI DER), producing a tag-4
/// envelope. Key wrapping only; the OAEP payload bound makes this
/// unsuitable for bulk data.
pub fn rsa_encrypt(plaintext: &[u8], public_key_der: &[u8]) -> Result<EncString> {
    let public_key = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| Error::Crypto(format!("SPKI parse: {e}")))?;

    let padding = Oaep::new::<sha1::Sha1>();
    let data = public_key
        .encrypt(&mut rand::thread_rng(), padding, plaintext)
        .map_err(|e| Error::Crypto(format!("RSA encrypt: {e}")))?;

    Ok(EncString::Rsa2048OaepSha1 { data })
}

/// Unwrap a tag-4 envelope with an RSA private key (PKCS#8 DER).
///
/// # Errors
/// - `Crypto` if the envelope is not asymmetric or the key fails to parse
/// - `DecryptionFailed` if OAEP decryption fails
pub fn rsa_decrypt(enc: &EncString, private_key_der: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let data = match enc {
        EncString::Rsa2048OaepSha1 { data } => data,
        _ => {
            return Err(Error::Crypto(
                "cannot decrypt symmetric envelope with an RSA key".to_string(),
            ))
        }
    };

    let private_key = RsaPrivateKey::from_pkcs8_der(private_key_der)
        .map_err(|e| Error::Crypto(format!("PKCS#8 parse: {e}")))?;

    let padding = Oaep::new::<sha1::Sha1>();
    let plaintext = private_key
        .decrypt(padding, data)
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(Zeroizing::new(plaintext))
}

/// Digest algorithm for fingerprints and legacy compatibility checks.
///
/// Never used as a password KDF; see `kdf` for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

/// Compute a plain digest of a value.
pub fn hash(value: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha1 => sha1::Sha1::digest(value).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(value).to_vec(),
        HashAlgorithm::Sha512 => sha2::Sha512::digest(value).to_vec(),
    }
}

/// Human-verifiable fingerprint of public key material.
///
/// SHA-256 of the input, rendered as five hyphen-separated hex groups.
/// Both sides of a device-approval exchange render this and compare it
/// out of band before any key is released.
pub fn fingerprint(material: &[u8]) -> String {
    let digest = Sha256::digest(material);
    digest[..20]
        .chunks(4)
        .map(hex_group)
        .collect::<Vec<_>>()
        .join("-")
}

fn hex_group(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
