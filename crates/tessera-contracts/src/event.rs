//! The producer-side description of an operation to record.
//!
//! Business handlers build an `AuditEvent` once their operation finishes and
//! hand it to `LedgerWriter::append`.  Hashes, ids, timestamps, and
//! `changed_fields` are filled in by the writer, never by callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    entry::{present, Amount, RequestContext},
    ids::ActorId,
    operation::OperationType,
};

/// An operation outcome awaiting append.
///
/// ```rust,ignore
/// let event = AuditEvent::new(OperationType::GoalUpdate)
///     .actor(ActorId::new("user-7"))
///     .resource("goal", "goal-42")
///     .snapshots(json!({ "amount": 500 }), json!({ "amount": 750 }))
///     .amount(Amount::from_major(750), "AUD");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// `None` attributes the event to `ActorId::system()`.
    pub actor_id: Option<ActorId>,
    pub session_id: Option<String>,
    pub operation_type: OperationType,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub previous_snapshot: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub current_snapshot: Option<Value>,
    pub amount: Option<Amount>,
    pub currency: Option<String>,
    pub tax_year: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
    pub context: RequestContext,
}

impl AuditEvent {
    /// A successful, system-attributed event with no payload.
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            actor_id: None,
            session_id: None,
            operation_type,
            resource_type: None,
            resource_id: None,
            previous_snapshot: None,
            current_snapshot: None,
            amount: None,
            currency: None,
            tax_year: None,
            success: true,
            error_message: None,
            context: RequestContext::system(),
        }
    }

    pub fn actor(mut self, actor: ActorId) -> Self {
        self.actor_id = Some(actor);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Resource kind without a specific instance, e.g. a GST calculation.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn previous(mut self, snapshot: Value) -> Self {
        self.previous_snapshot = Some(snapshot);
        self
    }

    pub fn current(mut self, snapshot: Value) -> Self {
        self.current_snapshot = Some(snapshot);
        self
    }

    pub fn snapshots(self, previous: Value, current: Value) -> Self {
        self.previous(previous).current(current)
    }

    pub fn amount(mut self, amount: Amount, currency: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }

    pub fn tax_year(mut self, year: u16) -> Self {
        self.tax_year = Some(year);
        self
    }

    /// Mark the underlying operation as failed.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}
