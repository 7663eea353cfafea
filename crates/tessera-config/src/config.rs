//! Configuration schema.
//!
//! Every section and field has a default, so an empty TOML document is a
//! valid configuration.
//!
//! Example:
//! ```toml
//! [writer]
//! max_persistence_retries = 5
//! spill_path = "/var/lib/tessera/spill.jsonl"
//!
//! [retention]
//! horizon_years = 7
//! compression = "gzip"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tessera_contracts::operation::OperationType;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub writer: WriterConfig,
    pub redaction: RedactionConfig,
    pub query: QueryConfig,
    pub retention: RetentionConfig,
}

/// Live store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file.  `None` selects the in-memory store.
    pub path: Option<PathBuf>,
    /// How long SQLite waits on a locked database before reporting contention.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 50,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Retry and spill policy for `LedgerWriter::append`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriterConfig {
    /// Retries after a tip conflict before the event is spilled.
    pub max_contention_retries: u32,
    /// Retries after a storage failure before the event is spilled.
    pub max_persistence_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Wall-clock ceiling for one append, retries included.
    pub append_budget_ms: u64,
    /// JSON-lines file receiving events whose budget ran out.
    pub spill_path: PathBuf,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_contention_retries: 16,
            max_persistence_retries: 3,
            backoff_base_ms: 2,
            backoff_max_ms: 50,
            append_budget_ms: 2_000,
            spill_path: PathBuf::from("tessera-spill.jsonl"),
        }
    }
}

impl WriterConfig {
    pub fn append_budget(&self) -> Duration {
        Duration::from_millis(self.append_budget_ms)
    }

    /// Exponential backoff for the given retry (1-based), capped at
    /// `backoff_max_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Snapshot redaction applied on every append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedactionConfig {
    /// Field names redacted in addition to the built-in denylist.
    pub extra_fields: Vec<String>,
    /// Replacement value written in place of a redacted field.
    pub mask: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            extra_fields: Vec::new(),
            mask: "[REDACTED]".to_string(),
        }
    }
}

/// Administrative listing limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Operations treated as security-sensitive in addition to the
    /// authentication and credential operations.
    pub extra_sensitive_operations: Vec<OperationType>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            extra_sensitive_operations: Vec::new(),
        }
    }
}

/// How exported archive files are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
        }
    }
}

/// Retention sweep policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Entries older than this many years are archived and purged.
    pub horizon_years: u32,
    pub archive_dir: PathBuf,
    pub compression: Compression,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_years: 7,
            archive_dir: PathBuf::from("archive"),
            compression: Compression::Gzip,
        }
    }
}
