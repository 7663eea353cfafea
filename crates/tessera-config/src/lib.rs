//! # tessera-config
//!
//! TOML-driven configuration for the TESSERA ledger.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use tessera_config::LedgerConfig;
//!
//! let config = LedgerConfig::from_file(Path::new("tessera.toml"))?;
//! ```
//!
//! Every field has a default; omitted sections keep them.  Unknown fields are
//! rejected so that a misspelt retention setting cannot silently fall back to
//! its default.

pub mod config;
pub mod load;

pub use config::{
    Compression, LedgerConfig, QueryConfig, RedactionConfig, RetentionConfig, StoreConfig,
    WriterConfig,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
