//! Fixed-width byte identifiers and their hex string encoding.
//!
//! Every identifier serializes as a `0x`-prefixed hex string so it can be used as a key
//! in JSON maps (persisted watcher and executor state rely on this).

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;

use crate::error::TypesError;

/// Decode a hex string (with or without `0x`) into exactly `N` bytes.
pub(crate) fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(TypesError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Implements `0x`-hex Display, FromStr and serde for a `[u8; N]` newtype.
macro_rules! hex_identifier {
    ($name:ident, $len:expr) => {
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $crate::hash::decode_fixed::<$len>(s).map(Self)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse()
                    .map_err(<D::Error as serde::de::Error>::custom)
            }
        }
    };
}

pub(crate) use hex_identifier;

/// A 32-byte transaction hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Short form used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.short())
    }
}

hex_identifier!(TxHash, 32);

/// Blake2b-256 over the concatenation of `parts`.
pub fn blake2b_256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_prefixed_hex() {
        let hash = TxHash::new([0xab; 32]);
        let s = hash.to_string();
        assert!(s.starts_with("0xabab"));
        assert_eq!(s.len(), 66);
    }

    #[test]
    fn parse_accepts_missing_prefix() {
        let hash = TxHash::new([7; 32]);
        let bare = hex::encode([7u8; 32]);
        assert_eq!(bare.parse::<TxHash>().unwrap(), hash);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "0x0102".parse::<TxHash>().unwrap_err();
        assert_eq!(
            err,
            TypesError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut map = std::collections::HashMap::new();
        map.insert(TxHash::new([1; 32]), 5u64);
        let json = serde_json::to_string(&map).unwrap();
        let back: std::collections::HashMap<TxHash, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&TxHash::new([1; 32])), Some(&5));
    }

    #[test]
    fn blake2b_is_deterministic() {
        assert_eq!(blake2b_256(&[b"a", b"b"]), blake2b_256(&[b"ab"]));
        assert_ne!(blake2b_256(&[b"a"]), blake2b_256(&[b"b"]));
    }
}
