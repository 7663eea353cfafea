//! Identifier and digest newtypes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LedgerError, LedgerResult};

/// Position of an entry in the ledger's total order.
///
/// Assigned inside the append transaction as one more than the current tip,
/// so ids are dense and strictly increasing in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl EntryId {
    /// The id that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The acting principal behind an audited operation.
///
/// Unauthenticated and background work is attributed to `ActorId::system()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    /// Sentinel value for events without an authenticated actor.
    pub const SYSTEM: &'static str = "system";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 256-bit chain digest.
///
/// Hashing always consumes the raw 32 bytes; the hex form exists only for
/// storage columns, JSON, and display.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHash([u8; ChainHash::LEN]);

impl ChainHash {
    /// Digest width in bytes.
    pub const LEN: usize = 32;

    /// The `previous_hash` of the first entry ever written: 32 zero bytes.
    pub const GENESIS: ChainHash = ChainHash([0u8; Self::LEN]);

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }

    /// Lowercase 64-character hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    ///
    /// Returns `LedgerError::Malformed` for any other length or for non-hex
    /// characters.
    pub fn from_hex(s: &str) -> LedgerResult<Self> {
        let raw = hex::decode(s).map_err(|e| LedgerError::Malformed {
            reason: format!("chain hash '{s}' is not valid hex: {e}"),
        })?;
        let bytes: [u8; Self::LEN] = raw.try_into().map_err(|v: Vec<u8>| LedgerError::Malformed {
            reason: format!("chain hash must be {} bytes, got {}", Self::LEN, v.len()),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", self.to_hex())
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
