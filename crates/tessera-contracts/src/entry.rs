//! Persisted ledger records.
//!
//! `EntryBody` holds every field that feeds the chain hash.  `AuditEntry`
//! wraps a body with its two hashes and is what stores persist and archives
//! export.  `Checkpoint` is the separate record the retention sweep writes
//! before purging a prefix of the chain.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    ids::{ActorId, ChainHash, EntryId},
    operation::OperationType,
};

/// Request metadata captured alongside an operation.
///
/// Every field is best-effort.  Callers without HTTP context (schedulers,
/// background jobs) use `RequestContext::system()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: String,
    pub user_agent: String,
    pub http_method: String,
    pub endpoint: String,
}

impl RequestContext {
    pub const UNKNOWN: &'static str = "unknown";
    pub const SYSTEM: &'static str = "system";

    /// Context for work that did not originate from an HTTP request.
    pub fn system() -> Self {
        Self {
            ip_address: Self::UNKNOWN.to_string(),
            user_agent: Self::UNKNOWN.to_string(),
            http_method: Self::SYSTEM.to_string(),
            endpoint: Self::SYSTEM.to_string(),
        }
    }

    /// Context for an HTTP request; client fields start as "unknown".
    pub fn http(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http_method: method.into(),
            endpoint: endpoint.into(),
            ..Self::system()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Replace blank fields with their documented defaults.
    pub fn normalized(self) -> Self {
        fn or_default(value: String, default: &str) -> String {
            if value.trim().is_empty() {
                default.to_string()
            } else {
                value
            }
        }
        Self {
            ip_address: or_default(self.ip_address, Self::UNKNOWN),
            user_agent: or_default(self.user_agent, Self::UNKNOWN),
            http_method: or_default(self.http_method, Self::SYSTEM),
            endpoint: or_default(self.endpoint, Self::SYSTEM),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::system()
    }
}

/// A monetary magnitude in minor units (cents).
///
/// Stored as an integer so the canonical form is exact: `Amount(75_000)`
/// always renders as `"750.00"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    /// Whole currency units, e.g. `Amount::from_major(500)` is 500.00.
    pub fn from_major(units: i64) -> Self {
        Self(units.saturating_mul(100))
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Fixed two-place decimal rendering used by the canonicalizer.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

/// Every hashed field of an entry, in schema order.
///
/// The field order here is documentation only; the canonicalizer fixes the
/// byte layout independently of struct or JSON ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryBody {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
    pub actor_id: ActorId,
    pub session_id: Option<String>,
    pub operation_type: OperationType,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub context: RequestContext,
    /// An absent snapshot and a JSON `null` snapshot hash differently, so
    /// absence is encoded by omitting the field.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub previous_snapshot: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub current_snapshot: Option<Value>,
    /// Sorted names of snapshot fields whose serialized values differ.
    pub changed_fields: Vec<String>,
    pub amount: Option<Amount>,
    /// ISO 4217 code, required whenever `amount` is present.
    pub currency: Option<String>,
    /// Financial year the operation applies to, named by its ending year.
    pub tax_year: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Deserialize a field that is present, even as `null`, into `Some`.
pub(crate) fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// A committed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub body: EntryBody,

    /// `hash_chain` of the predecessor in total order, or `ChainHash::GENESIS`.
    pub previous_hash: ChainHash,

    /// SHA-256 over the canonical body followed by the raw `previous_hash`.
    pub hash_chain: ChainHash,
}

impl AuditEntry {
    pub fn id(&self) -> EntryId {
        self.body.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.body.created_at
    }
}

/// Marks the logical start of the live chain after a retention purge.
///
/// `checkpoint_hash` is the `hash_chain` of the last purged entry, which is
/// exactly the `previous_hash` the earliest surviving entry carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_hash: ChainHash,
    /// The last entry removed by the purge this checkpoint precedes.
    pub superseded_entry_id: EntryId,
    pub created_at: DateTime<Utc>,
}

/// What a writer reads at the start of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    /// Id of the newest entry ever committed, live or purged.
    pub last_id: Option<EntryId>,
    /// The hash the next entry must link to.
    pub hash: ChainHash,
    /// `created_at` of the newest live entry, if any survive.
    pub last_created_at: Option<DateTime<Utc>>,
}

impl ChainTip {
    /// The tip of a ledger that has never held an entry.
    pub fn genesis() -> Self {
        Self {
            last_id: None,
            hash: ChainHash::GENESIS,
            last_created_at: None,
        }
    }

    /// Resolve the tip from the newest live entry and the newest checkpoint.
    ///
    /// A live entry always wins; a checkpoint only anchors a store whose
    /// entries were all purged.
    pub fn resolve(latest: Option<&AuditEntry>, checkpoint: Option<&Checkpoint>) -> Self {
        match (latest, checkpoint) {
            (Some(entry), _) => Self {
                last_id: Some(entry.id()),
                hash: entry.hash_chain,
                last_created_at: Some(entry.created_at()),
            },
            (None, Some(cp)) => Self {
                last_id: Some(cp.superseded_entry_id),
                hash: cp.checkpoint_hash,
                last_created_at: None,
            },
            (None, None) => Self::genesis(),
        }
    }

    /// The id the next committed entry receives.
    pub fn next_id(&self) -> EntryId {
        self.last_id.map_or(EntryId(1), EntryId::next)
    }
}
