//! Administrative query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entry::{AuditEntry, EntryBody},
    error::{LedgerError, LedgerResult},
    ids::{ActorId, ChainHash},
    operation::OperationType,
};

/// Reporting role held by a query or verification caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// May list entries; snapshots of security-sensitive operations are withheld.
    Auditor,
    /// May see every snapshot and run integrity verification.
    Administrator,
}

impl Role {
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Administrator)
    }
}

/// The identity of whoever is reading the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub actor_id: ActorId,
    pub role: Role,
}

impl Caller {
    pub fn new(actor_id: ActorId, role: Role) -> Self {
        Self { actor_id, role }
    }

    /// Fail with `Forbidden` unless the caller is an administrator.
    pub fn require_elevated(&self, action: &str) -> LedgerResult<()> {
        if self.role.is_elevated() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden {
                actor: self.actor_id.to_string(),
                action: action.to_string(),
            })
        }
    }
}

/// Row selection for listing entries.  All criteria are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub actor_id: Option<ActorId>,
    pub operation_type: Option<OperationType>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let body = &entry.body;
        self.actor_id.as_ref().map_or(true, |a| *a == body.actor_id)
            && self.operation_type.map_or(true, |op| op == body.operation_type)
            && self.from.map_or(true, |from| body.created_at >= from)
            && self.to.map_or(true, |to| body.created_at < to)
    }

    /// Reject windows whose lower bound is not before the upper bound.
    pub fn validate(&self) -> LedgerResult<()> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from >= to => Err(LedgerError::InvalidRange {
                reason: format!("start {from} is not before end {to}"),
            }),
            _ => Ok(()),
        }
    }
}

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// A page of results plus the total number of matching rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

/// An entry as shown to reporting callers.
///
/// When `snapshots_withheld` is true both snapshot fields of `body` are
/// `None` regardless of what was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub body: EntryBody,
    pub snapshots_withheld: bool,
    pub hash_chain: ChainHash,
}
