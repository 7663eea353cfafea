//! # tessera-store
//!
//! `LedgerStore` implementations for the TESSERA ledger.
//!
//! ## Overview
//!
//! - `MemoryLedgerStore` serializes appends behind one mutex.
//! - `SqliteLedgerStore` serializes appends with `BEGIN IMMEDIATE` and backs
//!   the chain with schema-level guards (unique `previous_hash`, immutability
//!   triggers).
//!
//! Both give every committed entry a dense id one above the tip and never
//! let two entries link to the same predecessor.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_store::open_store;
//!
//! let store = open_store(&config.store)?;
//! let writer = LedgerWriter::new(store, &config);
//! ```

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use tessera_config::StoreConfig;
use tessera_contracts::error::LedgerResult;
use tessera_core::traits::LedgerStore;

pub use memory::MemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

/// Open the store `config` describes: SQLite when a path is set, otherwise
/// an empty in-memory store.
pub fn open_store(config: &StoreConfig) -> LedgerResult<Arc<dyn LedgerStore>> {
    match &config.path {
        Some(path) => Ok(Arc::new(SqliteLedgerStore::open(path, config.busy_timeout())?)),
        None => Ok(Arc::new(MemoryLedgerStore::new())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
