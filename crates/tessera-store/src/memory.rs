//! In-memory implementation of `LedgerStore`.
//!
//! `MemoryLedgerStore` keeps entries and checkpoints in a `Vec` behind one
//! mutex.  The mutex is held from the tip read through the insert, which is
//! the single-serialized-writer discipline: no append can ever observe a
//! stale tip, so this store never reports contention.
//!
//! Intended for tests, the demo, and deployments without a database path.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use tessera_contracts::{
    entry::{AuditEntry, ChainTip, Checkpoint},
    error::{LedgerError, LedgerResult},
    ids::EntryId,
    query::EntryFilter,
};
use tessera_core::traits::LedgerStore;

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    /// Live entries in commit order.
    entries: Vec<AuditEntry>,
    /// Checkpoints in creation order.
    checkpoints: Vec<Checkpoint>,
}

impl MemoryState {
    fn tip(&self) -> ChainTip {
        ChainTip::resolve(self.entries.last(), self.checkpoints.last())
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the stored copy of an entry, bypassing the append path.
    ///
    /// Exists so integrity checks can be exercised against a tampered
    /// store; nothing on the write path calls it.
    pub fn overwrite(&self, entry: AuditEntry) -> LedgerResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .entries
            .iter_mut()
            .find(|e| e.id() == entry.id())
            .ok_or_else(|| LedgerError::Persistence {
                reason: format!("no live entry with id {}", entry.id()),
            })?;
        *slot = entry;
        Ok(())
    }

    /// Remove one live entry, bypassing the append path.  See `overwrite`.
    pub fn remove(&self, id: EntryId) -> Option<AuditEntry> {
        let mut state = self.state.lock();
        let index = state.entries.iter().position(|e| e.id() == id)?;
        Some(state.entries.remove(index))
    }
}

// ── LedgerStore impl ──────────────────────────────────────────────────────────

impl LedgerStore for MemoryLedgerStore {
    fn append_with(
        &self,
        build: &mut dyn FnMut(&ChainTip) -> LedgerResult<AuditEntry>,
    ) -> LedgerResult<AuditEntry> {
        let mut state = self.state.lock();
        let tip = state.tip();
        let entry = build(&tip)?;

        if entry.previous_hash != tip.hash || entry.id() != tip.next_id() {
            return Err(LedgerError::Contention {
                reason: format!(
                    "entry {} does not extend tip {} at {}",
                    entry.id(),
                    tip.next_id(),
                    tip.hash
                ),
            });
        }

        state.entries.push(entry.clone());
        debug!(id = %entry.id(), "entry appended to memory store");
        Ok(entry)
    }

    fn tip(&self) -> LedgerResult<ChainTip> {
        Ok(self.state.lock().tip())
    }

    fn list(&self, filter: &EntryFilter, offset: u64, limit: Option<u64>) -> LedgerResult<Vec<AuditEntry>> {
        let state = self.state.lock();
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        Ok(state
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    fn count(&self, filter: &EntryFilter) -> LedgerResult<u64> {
        let state = self.state.lock();
        Ok(state.entries.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    fn latest_before(&self, at: DateTime<Utc>) -> LedgerResult<Option<AuditEntry>> {
        let state = self.state.lock();
        Ok(state.entries.iter().rev().find(|e| e.created_at() < at).cloned())
    }

    fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
        Ok(self.state.lock().checkpoints.last().cloned())
    }

    fn checkpoints(&self) -> LedgerResult<Vec<Checkpoint>> {
        Ok(self.state.lock().checkpoints.clone())
    }

    fn purge_through(&self, checkpoint: &Checkpoint) -> LedgerResult<u64> {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.checkpoints.push(checkpoint.clone());
        state.entries.retain(|e| e.id() > checkpoint.superseded_entry_id);
        let purged = (before - state.entries.len()) as u64;
        debug!(
            through = %checkpoint.superseded_entry_id,
            purged,
            "memory store purged"
        );
        Ok(purged)
    }
}
