//! Versioned ciphertext envelope.
//!
//! An `EncString` encodes encrypted data as `{tag}.{data}` where tag 2 is
//! AES-256-CBC + HMAC-SHA256 (the only form produced for new data), tag 0
//! is legacy AES-256-CBC without a MAC (decrypt-only), and tag 4 is
//! RSA-2048-OAEP-SHA1 (key wrapping). Malformed envelopes are rejected at
//! parse time, before any cryptographic operation runs.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use keyfort_common::{Error, Result};

/// AES block / IV size in bytes.
pub const IV_LENGTH: usize = 16;
/// HMAC-SHA256 output size in bytes.
pub const MAC_LENGTH: usize = 32;

/// A parsed, versioned ciphertext envelope.
#[derive(Clone, PartialEq, Eq)]
pub enum EncString {
    /// Tag 0: AES-256-CBC without a MAC. Legacy records only; never
    /// produced for new data.
    AesCbc256 { iv: Vec<u8>, data: Vec<u8> },
    /// Tag 2: AES-256-CBC + HMAC-SHA256 over IV‖ciphertext.
    AesCbc256HmacSha256 {
        iv: Vec<u8>,
        data: Vec<u8>,
        mac: Vec<u8>,
    },
    /// Tag 4: RSA-2048-OAEP-SHA1, used only for key wrapping.
    Rsa2048OaepSha1 { data: Vec<u8> },
}

impl EncString {
    /// The envelope's algorithm tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::AesCbc256 { .. } => 0,
            Self::AesCbc256HmacSha256 { .. } => 2,
            Self::Rsa2048OaepSha1 { .. } => 4,
        }
    }

    /// Parse an envelope from its string form.
    ///
    /// Supported formats:
    /// - `0.{iv_b64}|{ct_b64}` — legacy symmetric without MAC
    /// - `2.{iv_b64}|{ct_b64}|{mac_b64}` — symmetric with MAC
    /// - `4.{ct_b64}` — asymmetric
    ///
    /// # Errors
    /// - `InvalidInput` for a missing tag, unknown tag, wrong part count,
    ///   bad base64, or truncated IV/MAC
    pub fn parse(s: &str) -> Result<Self> {
        let (tag, data) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidInput("EncString missing tag separator".to_string()))?;

        match tag {
            "0" => {
                let [iv, ct] = split_parts::<2>(data)?;
                let iv = b64_decode(iv)?;
                check_iv(&iv)?;
                Ok(Self::AesCbc256 {
                    iv,
                    data: b64_decode(ct)?,
                })
            }
            "2" => {
                let [iv, ct, mac] = split_parts::<3>(data)?;
                let iv = b64_decode(iv)?;
                check_iv(&iv)?;
                let mac = b64_decode(mac)?;
                if mac.len() != MAC_LENGTH {
                    return Err(Error::InvalidInput(format!(
                        "EncString MAC must be {MAC_LENGTH} bytes, got {}",
                        mac.len()
                    )));
                }
                Ok(Self::AesCbc256HmacSha256 {
                    iv,
                    data: b64_decode(ct)?,
                    mac,
                })
            }
            "4" => Ok(Self::Rsa2048OaepSha1 {
                data: b64_decode(data)?,
            }),
            t => Err(Error::InvalidInput(format!(
                "unknown EncString tag: {t}"
            ))),
        }
    }
}

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() != IV_LENGTH {
        return Err(Error::InvalidInput(format!(
            "EncString IV must be {IV_LENGTH} bytes, got {}",
            iv.len()
        )));
    }
    Ok(())
}

fn split_parts<const N: usize>(data: &str) -> Result<[&str; N]> {
    let parts: Vec<&str> = data.split('|').collect();
    parts.try_into().map_err(|_| {
        Error::InvalidInput(format!("EncString has wrong number of parts, expected {N}"))
    })
}

fn b64_decode(s: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| Error::InvalidInput(format!("EncString base64: {e}")))
}

impl fmt::Display for EncString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AesCbc256 { iv, data } => {
                write!(f, "0.{}|{}", STANDARD.encode(iv), STANDARD.encode(data))
            }
            Self::AesCbc256HmacSha256 { iv, data, mac } => write!(
                f,
                "2.{}|{}|{}",
                STANDARD.encode(iv),
                STANDARD.encode(data),
                STANDARD.encode(mac)
            ),
            Self::Rsa2048OaepSha1 { data } => write!(f, "4.{}", STANDARD.encode(data)),
        }
    }
}

impl FromStr for EncString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Ciphertext is not secret, but keep Debug compact: the string form.
impl fmt::Debug for EncString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncString({self})")
    }
}

impl Serialize for EncString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EncString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_string_form() {
        let enc = EncString::AesCbc256HmacSha256 {
            iv: vec![1u8; IV_LENGTH],
            data: vec![2u8; 32],
            mac: vec![3u8; MAC_LENGTH],
        };
        let s = enc.to_string();
        assert!(s.starts_with("2."));
        let parsed = EncString::parse(&s).unwrap();
        assert_eq!(parsed, enc);
    }

    #[test]
    fn test_parse_legacy_without_mac() {
        let enc = EncString::AesCbc256 {
            iv: vec![1u8; IV_LENGTH],
            data: vec![2u8; 16],
        };
        let parsed = EncString::parse(&enc.to_string()).unwrap();
        assert_eq!(parsed.tag(), 0);
    }

    #[test]
    fn test_parse_asymmetric() {
        let enc = EncString::Rsa2048OaepSha1 {
            data: vec![7u8; 256],
        };
        let parsed = EncString::parse(&enc.to_string()).unwrap();
        assert_eq!(parsed.tag(), 4);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(EncString::parse("no_tag").is_err());
        assert!(EncString::parse("9.AAAA").is_err());
        assert!(EncString::parse("2.onlyonepart").is_err());
        assert!(EncString::parse("2.a|b|c|d").is_err());
        assert!(EncString::parse("2.!!!|@@@|###").is_err());
    }

    #[test]
    fn test_rejects_truncated_iv_and_mac() {
        let short_iv = format!(
            "2.{}|{}|{}",
            STANDARD.encode([0u8; 8]),
            STANDARD.encode([0u8; 16]),
            STANDARD.encode([0u8; MAC_LENGTH]),
        );
        assert!(EncString::parse(&short_iv).is_err());

        let short_mac = format!(
            "2.{}|{}|{}",
            STANDARD.encode([0u8; IV_LENGTH]),
            STANDARD.encode([0u8; 16]),
            STANDARD.encode([0u8; 8]),
        );
        assert!(EncString::parse(&short_mac).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let enc = EncString::AesCbc256HmacSha256 {
            iv: vec![1u8; IV_LENGTH],
            data: vec![2u8; 16],
            mac: vec![3u8; MAC_LENGTH],
        };
        let json = serde_json::to_string(&enc).unwrap();
        assert!(json.starts_with("\"2."));
        let restored: EncString = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, enc);
    }
}
