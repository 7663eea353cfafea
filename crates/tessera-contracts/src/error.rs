//! Error types for the TESSERA ledger.
//!
//! Fallible ledger operations return `LedgerResult<T>`.  The write path never
//! lets these escape to a business caller: `LedgerWriter` classifies them and
//! recovers locally.  Only the read-side tools surface them to operators.

use thiserror::Error;

/// The unified error type for the TESSERA ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The event or stored entry cannot be canonicalized.
    ///
    /// Never retried: a malformed input cannot become well-formed by trying
    /// again.
    #[error("malformed audit event: {reason}")]
    Malformed { reason: String },

    /// Another writer committed against the tip this writer observed.
    #[error("chain tip contention: {reason}")]
    Contention { reason: String },

    /// The live store is unavailable or rejected the write.
    #[error("ledger persistence failed: {reason}")]
    Persistence { reason: String },

    /// The local spill file could not be written or read.
    #[error("spill file error: {reason}")]
    Spill { reason: String },

    /// Exporting to, or reading from, long-term archive storage failed.
    #[error("archive error: {reason}")]
    Archive { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The caller does not hold the role the operation requires.
    #[error("caller '{actor}' is not permitted to {action}")]
    Forbidden { actor: String, action: String },

    /// A query or verification window is inconsistent.
    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },
}

impl LedgerError {
    /// True for failures that may succeed if the append is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::Persistence { .. })
    }
}

/// Convenience alias used throughout the TESSERA crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
