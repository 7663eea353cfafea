//! Retention sweep: export, checkpoint, purge.
//!
//! A sweep runs in four steps, each of which must succeed before the next:
//!
//! 1. **Select** every live entry created before the cutoff.  `created_at`
//!    never decreases along the chain, so this is always a prefix.
//! 2. **Check** that prefix links to the current anchor.  A broken prefix is
//!    never archived: purging it would destroy the evidence.
//! 3. **Export** the prefix verbatim to the `ArchiveSink`.
//! 4. **Purge** through the store, which records the checkpoint and deletes
//!    the prefix in one transaction.
//!
//! If the purge fails the export stays behind.  The next sweep selects the
//! same prefix, or a longer one, and exports it again; the sink reuses or
//! replaces what it already holds.

use std::sync::Arc;

use chrono::{DateTime, Months, SubsecRound, Utc};
use tracing::{info, warn};

use tessera_chain::verify_links;
use tessera_contracts::{
    entry::Checkpoint,
    error::{LedgerError, LedgerResult},
    ids::ChainHash,
    query::EntryFilter,
    report::SweepReport,
};
use tessera_core::traits::{ArchiveSink, LedgerStore};

/// Moves entries past the retention horizon from the live store into an
/// archive.
pub struct RetentionArchiver {
    store: Arc<dyn LedgerStore>,
    sink: Arc<dyn ArchiveSink>,
}

impl RetentionArchiver {
    pub fn new(store: Arc<dyn LedgerStore>, sink: Arc<dyn ArchiveSink>) -> Self {
        Self { store, sink }
    }

    /// Sweep every entry older than `horizon_years` calendar years.
    pub fn sweep(&self, horizon_years: u32) -> LedgerResult<SweepReport> {
        self.sweep_before(retention_cutoff(Utc::now(), horizon_years)?)
    }

    /// Sweep every entry created strictly before `cutoff`.
    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<SweepReport> {
        let filter = EntryFilter {
            to: Some(cutoff),
            ..EntryFilter::default()
        };
        let due = self.store.list(&filter, 0, None)?;
        let Some(last) = due.last() else {
            info!(cutoff = %cutoff, "retention sweep found nothing due");
            return Ok(SweepReport::empty());
        };

        let anchor = self
            .store
            .latest_checkpoint()?
            .map_or(ChainHash::GENESIS, |cp| cp.checkpoint_hash);
        let check = verify_links(&due, anchor);
        if !check.valid {
            warn!(
                first_break = ?check.first_break_id,
                reasons = ?check.reasons,
                "refusing to archive a broken segment"
            );
            return Err(LedgerError::Archive {
                reason: format!(
                    "segment due for archival is broken at entry {}: {}",
                    check
                        .first_break_id
                        .map_or_else(|| "?".to_string(), |id| id.to_string()),
                    check.reasons.join("; ")
                ),
            });
        }

        let location = self.sink.export(&due)?;

        let checkpoint = Checkpoint {
            checkpoint_hash: last.hash_chain,
            superseded_entry_id: last.id(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        let purged = self.store.purge_through(&checkpoint)?;

        info!(
            archived = due.len(),
            purged,
            through = %checkpoint.superseded_entry_id,
            checkpoint = %checkpoint.checkpoint_hash,
            archive = %location,
            "retention sweep finished"
        );

        Ok(SweepReport {
            archived: due.len() as u64,
            purged,
            checkpoint: Some(checkpoint),
            archive_location: Some(location),
        })
    }
}

/// `now` moved back by `horizon_years` calendar years.
///
/// Feb 29 falls back to Feb 28 in non-leap target years.
pub fn retention_cutoff(now: DateTime<Utc>, horizon_years: u32) -> LedgerResult<DateTime<Utc>> {
    horizon_years
        .checked_mul(12)
        .and_then(|months| now.checked_sub_months(Months::new(months)))
        .ok_or_else(|| LedgerError::InvalidRange {
            reason: format!("retention horizon of {horizon_years} years is out of range"),
        })
}
