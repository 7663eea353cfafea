//! Outcome types returned by the writer, verifier, and retention sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entry::Checkpoint,
    ids::{ChainHash, EntryId},
};

/// What happened to one `append` call.
///
/// Never an error: business callers may ignore it entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AppendStatus {
    /// The entry is durably part of the chain.
    Committed { id: EntryId },
    /// The budget ran out; the redacted event is in the spill file.
    Spilled { reason: String },
    /// Malformed input, or the spill file itself failed.
    Dropped { reason: String },
}

impl AppendStatus {
    pub fn entry_id(&self) -> Option<EntryId> {
        match self {
            Self::Committed { id } => Some(*id),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Administrative verification window, both bounds optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// The result of replaying a stretch of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only if every replayed entry linked and re-hashed correctly.
    pub valid: bool,
    /// The first entry that failed either check.  Later entries are not
    /// examined.
    pub first_break_id: Option<EntryId>,
    /// Human-readable explanations for the break, empty when valid.
    pub reasons: Vec<String>,
    /// Entries examined, including the breaking one.
    pub entries_checked: u64,
    /// The hash the replay started from.
    pub anchor: ChainHash,
}

impl VerificationReport {
    pub fn valid(entries_checked: u64, anchor: ChainHash) -> Self {
        Self {
            valid: true,
            first_break_id: None,
            reasons: Vec::new(),
            entries_checked,
            anchor,
        }
    }
}

/// The result of one retention sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub archived: u64,
    pub purged: u64,
    /// Written immediately before the purge; `None` when nothing was due.
    pub checkpoint: Option<Checkpoint>,
    /// Where the exported segment landed.
    pub archive_location: Option<String>,
}

impl SweepReport {
    pub fn empty() -> Self {
        Self {
            archived: 0,
            purged: 0,
            checkpoint: None,
            archive_location: None,
        }
    }
}
