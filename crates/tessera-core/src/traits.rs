//! Trait seams of the ledger.
//!
//! - `AuditRecorder`: what business handlers call once an operation finishes
//! - `LedgerStore`:   the live store; owns the only shared mutable state
//! - `ArchiveSink`:   long-term storage the retention sweep exports into
//!
//! Canonicalization and hashing are plain functions in `tessera-chain` and
//! need no seam: they are pure.

use chrono::{DateTime, Utc};

use tessera_contracts::{
    entry::{AuditEntry, ChainTip, Checkpoint},
    error::LedgerResult,
    event::AuditEvent,
    query::EntryFilter,
    report::AppendStatus,
};

/// The producer interface every business collaborator consumes.
///
/// Infallible by signature: recording an audit event can never abort the
/// operation being audited.
pub trait AuditRecorder: Send + Sync {
    fn record_event(&self, event: AuditEvent) -> AppendStatus;
}

/// Persistent storage for committed entries and checkpoints.
///
/// Implementations must be thread-safe.  Every read returns a consistent
/// snapshot of committed rows, ordered by `(created_at, id)`.
pub trait LedgerStore: Send + Sync {
    /// Read the chain tip, build the next entry from it, and insert that
    /// entry as one atomic unit.
    ///
    /// No other append may commit between the tip read and the insert.  An
    /// implementation that detects a concurrent writer instead of excluding it
    /// must abort and return `LedgerError::Contention` so the caller can retry
    /// from a fresh tip.  Errors returned by `build` are propagated unchanged.
    fn append_with(
        &self,
        build: &mut dyn FnMut(&ChainTip) -> LedgerResult<AuditEntry>,
    ) -> LedgerResult<AuditEntry>;

    /// The current tip: newest entry, else newest checkpoint, else genesis.
    fn tip(&self) -> LedgerResult<ChainTip>;

    /// Entries matching `filter` in total order, skipping `offset` rows and
    /// returning at most `limit` when given.
    fn list(&self, filter: &EntryFilter, offset: u64, limit: Option<u64>) -> LedgerResult<Vec<AuditEntry>>;

    /// Number of entries matching `filter`.
    fn count(&self, filter: &EntryFilter) -> LedgerResult<u64>;

    /// The newest entry created strictly before `at`.
    fn latest_before(&self, at: DateTime<Utc>) -> LedgerResult<Option<AuditEntry>>;

    /// The newest checkpoint, if any retention purge has run.
    fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>>;

    /// Every checkpoint in creation order.
    fn checkpoints(&self) -> LedgerResult<Vec<Checkpoint>>;

    /// Record `checkpoint` and delete every entry with id up to and including
    /// `checkpoint.superseded_entry_id`, atomically.
    ///
    /// Returns the number of entries deleted.
    fn purge_through(&self, checkpoint: &Checkpoint) -> LedgerResult<u64>;
}

/// Durable long-term storage for purged entries.
pub trait ArchiveSink: Send + Sync {
    /// Write `entries` verbatim and return a description of where they went.
    ///
    /// Must not return until the export is durable: the sweep deletes the
    /// live copies as soon as this succeeds.  A sweep whose purge failed
    /// exports the same prefix again, possibly extended, so a repeated
    /// export must succeed without leaving two copies of an entry behind.
    fn export(&self, entries: &[AuditEntry]) -> LedgerResult<String>;
}
