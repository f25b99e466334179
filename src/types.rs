//! Feed identity and record types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PinError;

/// Length of a feed public key in bytes
pub const PUBLIC_KEY_LEN: usize = 32;

/// Public key identifying a feed on the network.
///
/// Always 64 hex characters on the wire; stored as raw bytes so ordering
/// and equality don't depend on the caller's casing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Lowercase hex form used in URLs, logs and persisted keys
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for PublicKey {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PUBLIC_KEY_LEN * 2 {
            return Err(PinError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                PUBLIC_KEY_LEN * 2,
                s.len()
            )));
        }

        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| PinError::InvalidKey(format!("not hex: {}", e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Latest value published on a feed.
///
/// Only network adapters produce these; the timestamp comes from the
/// publisher, never from the local clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl Record {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }

    /// True if `self` was published strictly after `other`
    pub fn is_newer_than(&self, other: &Record) -> bool {
        self.timestamp > other.timestamp
    }
}
