//! Fixed-width content hashes for fingerprint identity.
//!
//! Rhythm, pitch, and combined hashes live in three separate newtypes over
//! the same 128-bit truncated BLAKE3 digest, so the three hash spaces can
//! never be compared or swapped by accident. 128 bits is far beyond what a
//! note corpus can collide while staying short enough to paste on a command
//! line (32 hex chars).

use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Digest width in bytes (BLAKE3 output truncated to 128 bits).
pub const HASH_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum HashParseError {
    #[error("invalid hash length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

macro_rules! hash_newtype {
    ($name:ident) => {
        impl $name {
            /// Digest raw content bytes into this hash space.
            pub fn from_content(data: &[u8]) -> Self {
                let digest = blake3::hash(data);
                let mut bytes = [0u8; HASH_LEN];
                bytes.copy_from_slice(&digest.as_bytes()[..HASH_LEN]);
                Self(bytes)
            }

            pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
                &self.0
            }

            /// Lowercase hex, always 32 chars.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex (case-insensitive), validating length and alphabet.
            pub fn parse_hex(s: &str) -> Result<Self, HashParseError> {
                if s.len() != HASH_LEN * 2 {
                    return Err(HashParseError::InvalidLength(s.len()));
                }
                let mut bytes = [0u8; HASH_LEN];
                hex::decode_to_slice(s.to_lowercase(), &mut bytes)
                    .map_err(|_| HashParseError::InvalidHex)?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = HashParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse_hex(&s).map_err(de::Error::custom)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.to_hex()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Self::parse_hex(s).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

/// Identity of a rhythm signature: digest of the grid geometry and onset
/// flags. Accent/velocity data never participates, so two performances with
/// the same rhythm at different dynamics share a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RhythmHash([u8; HASH_LEN]);

/// Identity of a pitch signature: digest of the interval sequence only.
/// Absolute pitch never participates, so the hash is invariant under
/// constant transposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PitchHash([u8; HASH_LEN]);

/// Primary key for a stored pattern: the rhythm and pitch sub-hashes
/// digested together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternHash([u8; HASH_LEN]);

hash_newtype!(RhythmHash);
hash_newtype!(PitchHash);
hash_newtype!(PatternHash);

impl PatternHash {
    /// Combine the two sub-hashes into the pattern's primary identity.
    pub fn combine(rhythm: &RhythmHash, pitch: &PitchHash) -> Self {
        let mut buf = [0u8; HASH_LEN * 2];
        buf[..HASH_LEN].copy_from_slice(rhythm.as_bytes());
        buf[HASH_LEN..].copy_from_slice(pitch.as_bytes());
        Self::from_content(&buf)
    }
}
