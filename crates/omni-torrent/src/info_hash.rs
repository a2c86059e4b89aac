//! The 20-byte SHA-1 content identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::TorrentError;

/// 20-byte SHA-1 of the bencoded info dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Hash the bencoded info dictionary bytes.
    #[must_use]
    pub fn from_info_bytes(info: &[u8]) -> Self {
        let digest = Sha1::digest(info);
        let mut bytes = [0_u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Borrow the raw 20 bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Render the lowercase hex form used in APIs and the database.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = TorrentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(value.trim()).map_err(|_| TorrentError::InvalidInfoHash {
            value: value.to_string(),
        })?;
        let bytes: [u8; 20] =
            decoded
                .try_into()
                .map_err(|_| TorrentError::InvalidInfoHash {
                    value: value.to_string(),
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hash = InfoHash::from_info_bytes(b"d4:name4:demoe");
        let parsed: InfoHash = hash.to_hex().parse().expect("parse");
        assert_eq!(parsed, hash);
    }

    #[test]
    fn rejects_short_hex() {
        assert!("abcd".parse::<InfoHash>().is_err());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let hash = InfoHash([0xab_u8; 20]);
        let json = serde_json::to_string(&hash).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
    }
}
