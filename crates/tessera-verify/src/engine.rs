//! Integrity verifier over a `LedgerStore`.
//!
//! `IntegrityVerifier` reads a window of committed entries in total order
//! and replays the chain with `tessera_chain::verify_links`.  Verification
//! runs in two phases:
//!
//! 1. **Anchor**: decide which hash the first entry in the window must link
//!    to (see `Anchor`).
//! 2. **Replay**: check linkage and recompute every hash, stopping at the
//!    first break.
//!
//! Nothing here writes.  A break is a reported result and is never repaired.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tessera_chain::verify_links;
use tessera_contracts::{
    entry::AuditEntry,
    error::{LedgerError, LedgerResult},
    ids::ChainHash,
    query::{Caller, EntryFilter},
    report::{VerificationReport, VerifyRequest},
};
use tessera_core::traits::LedgerStore;

/// Reads of a window before giving up on a ledger that keeps being purged.
const MAX_READ_ATTEMPTS: u32 = 5;

/// Where replay of a window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "hash", rename_all = "snake_case")]
pub enum Anchor {
    /// The live predecessor of the window's first entry; failing that, the
    /// newest checkpoint; failing that, genesis.
    Auto,
    /// Always 32 zero bytes.  Reports a break at the earliest live entry of
    /// any ledger that has been swept.
    Genesis,
    /// A caller-supplied hash, typically a checkpoint or an archive's last
    /// `hash_chain`.
    Hash(ChainHash),
}

/// A verification window.  `start` is inclusive and `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub anchor: Anchor,
}

impl VerifyRange {
    /// Every live entry, anchored automatically.
    pub fn all() -> Self {
        Self {
            start: None,
            end: None,
            anchor: Anchor::Auto,
        }
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    fn filter(&self) -> EntryFilter {
        EntryFilter {
            from: self.start,
            to: self.end,
            ..EntryFilter::default()
        }
    }
}

impl Default for VerifyRange {
    fn default() -> Self {
        Self::all()
    }
}

impl From<&VerifyRequest> for VerifyRange {
    fn from(request: &VerifyRequest) -> Self {
        Self {
            start: request.start_date,
            end: request.end_date,
            anchor: Anchor::Auto,
        }
    }
}

/// Read-only chain replay over a live store.
pub struct IntegrityVerifier {
    store: Arc<dyn LedgerStore>,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Replay every live entry inside `range`.
    ///
    /// Returns `Err` only when the window is inverted or the store cannot be
    /// read.  A broken chain is `Ok` with `valid == false`.
    pub fn verify(&self, range: &VerifyRange) -> LedgerResult<VerificationReport> {
        let filter = range.filter();
        filter.validate()?;

        let (anchor, entries) = self.read_window(range, &filter)?;
        debug!(entries = entries.len(), anchor = %anchor, "replaying ledger window");

        let report = verify_links(&entries, anchor);
        info!(
            valid = report.valid,
            checked = report.entries_checked,
            first_break = ?report.first_break_id,
            "ledger verification finished"
        );
        Ok(report)
    }

    /// Administrative entry point: only elevated callers may verify.
    pub fn verify_request(&self, caller: &Caller, request: &VerifyRequest) -> LedgerResult<VerificationReport> {
        caller.require_elevated("verify ledger integrity")?;
        self.verify(&VerifyRange::from(request))
    }

    /// Replay `archived` entries from genesis and continue straight into the
    /// live store.
    ///
    /// `archived` must hold every purged entry; they are replayed in id order
    /// whatever order they arrive in.  Identical copies of an entry, in two
    /// archives or in an archive and the live store, are replayed once.  A
    /// gap between archives, or between the last archive and the live store,
    /// is reported as a break, and so is an id carried by two different
    /// entries.
    pub fn verify_history<I>(&self, archived: I) -> LedgerResult<VerificationReport>
    where
        I: IntoIterator<Item = AuditEntry>,
    {
        let mut history: Vec<AuditEntry> = archived.into_iter().collect();
        let archived_count = history.len();

        history.extend(self.store.list(&EntryFilter::default(), 0, None)?);
        history.sort_by_key(AuditEntry::id);
        history.dedup();
        debug!(archived = archived_count, total = history.len(), "replaying full history");

        let report = verify_links(&history, ChainHash::GENESIS);
        info!(
            valid = report.valid,
            checked = report.entries_checked,
            first_break = ?report.first_break_id,
            "full history verification finished"
        );
        Ok(report)
    }

    /// Resolve the anchor and list the window as one consistent read.
    ///
    /// A retention purge always records a new checkpoint, so an unchanged
    /// latest checkpoint around both reads means none landed between them.
    fn read_window(&self, range: &VerifyRange, filter: &EntryFilter) -> LedgerResult<(ChainHash, Vec<AuditEntry>)> {
        for attempt in 1..=MAX_READ_ATTEMPTS {
            let before = self.store.latest_checkpoint()?;
            let anchor = self.resolve_anchor(range)?;
            let entries = self.store.list(filter, 0, None)?;
            if self.store.latest_checkpoint()? == before {
                return Ok((anchor, entries));
            }
            debug!(attempt, "ledger purged during verification; reading again");
        }
        Err(LedgerError::Contention {
            reason: format!("ledger was purged during each of {MAX_READ_ATTEMPTS} verification reads"),
        })
    }

    /// The hash the first entry of `range` must carry as `previous_hash`.
    pub fn resolve_anchor(&self, range: &VerifyRange) -> LedgerResult<ChainHash> {
        match range.anchor {
            Anchor::Genesis => Ok(ChainHash::GENESIS),
            Anchor::Hash(hash) => Ok(hash),
            Anchor::Auto => {
                if let Some(start) = range.start {
                    if let Some(predecessor) = self.store.latest_before(start)? {
                        return Ok(predecessor.hash_chain);
                    }
                }
                Ok(self
                    .store
                    .latest_checkpoint()?
                    .map_or(ChainHash::GENESIS, |cp| cp.checkpoint_hash))
            }
        }
    }
}
