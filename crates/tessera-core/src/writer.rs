//! The ledger writer: the single append path.
//!
//! Every event passes through the same pipeline:
//!
//!   Redact → Diff → [tip read → seal → insert] → Committed
//!                        ↑ retry on Contention / Persistence
//!                        └─ budget exhausted → Spill → Spilled
//!
//! The bracketed step runs inside `LedgerStore::append_with`, which owns the
//! serialization of the chain tip.  Nothing in this module returns an error
//! to the business caller: every outcome is an `AppendStatus`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tessera_chain::{canonicalize, seal};
use tessera_config::{LedgerConfig, WriterConfig};
use tessera_contracts::{
    entry::{AuditEntry, ChainTip, EntryBody},
    error::{LedgerError, LedgerResult},
    event::AuditEvent,
    ids::{ActorId, EntryId},
    report::AppendStatus,
};

use crate::{
    diff::changed_fields,
    redact::Redactor,
    spill::{SpillFile, SpillRecord},
    traits::{AuditRecorder, LedgerStore},
};

/// Point-in-time copy of the writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterHealth {
    pub committed: u64,
    pub contention_retries: u64,
    pub persistence_retries: u64,
    pub spilled: u64,
    pub dropped: u64,
    pub replayed: u64,
}

/// Outcome of one `reconcile_spill` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Spilled events now committed to the chain.
    pub replayed: u64,
    /// Events written back to the spill file for a later pass.
    pub remaining: u64,
    /// Events that can never be committed and were discarded.
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    committed: AtomicU64,
    contention_retries: AtomicU64,
    persistence_retries: AtomicU64,
    spilled: AtomicU64,
    dropped: AtomicU64,
    replayed: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A redacted event with everything but its chain position filled in.
struct Draft {
    template: EntryBody,
}

impl Draft {
    /// Bind the draft to `tip` and seal it.
    ///
    /// `created_at` never precedes the tip's, so timestamp order and id
    /// order agree.
    fn seal_at(&self, tip: &ChainTip) -> LedgerResult<AuditEntry> {
        let now = Utc::now().trunc_subsecs(6);
        let mut body = self.template.clone();
        body.id = tip.next_id();
        body.created_at = tip.last_created_at.map_or(now, |last| now.max(last));
        seal(body, tip.hash)
    }
}

/// Why an append did not commit.
struct Failure {
    error: LedgerError,
    attempts: u32,
}

/// Appends audit events to a `LedgerStore`.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and may be called
/// from any number of threads.
pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
    redactor: Redactor,
    config: WriterConfig,
    spill: SpillFile,
    counters: Counters,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Self {
        Self {
            store,
            redactor: Redactor::new(&config.redaction),
            config: config.writer.clone(),
            spill: SpillFile::new(config.writer.spill_path.clone()),
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn spill_file(&self) -> &SpillFile {
        &self.spill
    }

    /// Record `event` and report what happened.  Never panics, never errors.
    pub fn append(&self, event: AuditEvent) -> AppendStatus {
        let operation = event.operation_type;
        let event = self.sanitize(event);

        let draft = match self.draft(&event) {
            Ok(draft) => draft,
            Err(e) => return self.drop_event(operation, e),
        };

        match self.commit(&draft) {
            Ok(entry) => {
                bump(&self.counters.committed);
                debug!(
                    id = %entry.id(),
                    operation = %operation,
                    hash = %entry.hash_chain,
                    "audit entry committed"
                );
                AppendStatus::Committed { id: entry.id() }
            }
            Err(failure) if failure.error.is_transient() => self.spill_event(event, failure),
            Err(failure) => self.drop_event(operation, failure.error),
        }
    }

    /// Counters accumulated since construction.
    pub fn health(&self) -> WriterHealth {
        let c = &self.counters;
        WriterHealth {
            committed: c.committed.load(Ordering::Relaxed),
            contention_retries: c.contention_retries.load(Ordering::Relaxed),
            persistence_retries: c.persistence_retries.load(Ordering::Relaxed),
            spilled: c.spilled.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            replayed: c.replayed.load(Ordering::Relaxed),
        }
    }

    /// Replay the spill file through the normal append path.
    ///
    /// Records replay in spill order.  The first transient failure stops the
    /// pass; that record (with its attempt count and reason updated) and
    /// every record after it go back to the spill file.  Records that can
    /// never commit are discarded with an alert.  The records stay on disk
    /// until the pass closes, so a pass that dies part way is replayed again
    /// in full by the next one.
    pub fn reconcile_spill(&self) -> LedgerResult<ReconcileReport> {
        let records = self.spill.begin_replay()?;
        let total = records.len();
        if records.is_empty() {
            self.spill.finish_replay(&[], 0)?;
            return Ok(ReconcileReport::default());
        }

        let mut report = ReconcileReport::default();
        let mut pending = records.into_iter();
        let mut keep: Vec<SpillRecord> = Vec::new();

        for mut record in pending.by_ref() {
            let outcome = self.draft(&record.event).and_then(|draft| {
                self.commit(&draft).map_err(|f| {
                    record.attempts = record.attempts.saturating_add(f.attempts);
                    f.error
                })
            });
            match outcome {
                Ok(entry) => {
                    bump(&self.counters.replayed);
                    report.replayed += 1;
                    debug!(id = %entry.id(), "spilled event replayed");
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "spill replay interrupted; store still unavailable");
                    record.reason = e.to_string();
                    keep.push(record);
                    break;
                }
                Err(e) => {
                    bump(&self.counters.dropped);
                    report.discarded += 1;
                    error!(
                        target: "tessera::alert",
                        operation = %record.event.operation_type,
                        error = %e,
                        "spilled event can never be committed; discarded"
                    );
                }
            }
        }
        keep.extend(pending);
        report.remaining = keep.len() as u64;

        if let Err(e) = self.spill.finish_replay(&keep, total) {
            error!(
                target: "tessera::alert",
                replay = %self.spill.replay_path().display(),
                replayed = report.replayed,
                error = %e,
                "failed to close spill replay; the next pass will replay every record again"
            );
            return Err(e);
        }

        info!(
            total,
            replayed = report.replayed,
            remaining = report.remaining,
            discarded = report.discarded,
            "spill reconciliation finished"
        );
        Ok(report)
    }

    // ── Pipeline stages ──────────────────────────────────────────────────────

    /// Redact snapshots, attribute to the system actor when none is given,
    /// and fill blank context fields.
    fn sanitize(&self, mut event: AuditEvent) -> AuditEvent {
        let mut masked = 0;
        for snapshot in [&mut event.previous_snapshot, &mut event.current_snapshot]
            .into_iter()
            .flatten()
        {
            masked += self.redactor.redact(snapshot);
        }
        if masked > 0 {
            debug!(operation = %event.operation_type, masked, "snapshot fields redacted");
        }

        if event.actor_id.as_ref().map_or(true, |a| a.as_str().trim().is_empty()) {
            event.actor_id = Some(ActorId::system());
        }
        event.context = event.context.normalized();
        event
    }

    /// Build and validate the entry body, leaving id and timestamp for the
    /// store transaction.
    fn draft(&self, event: &AuditEvent) -> LedgerResult<Draft> {
        let changed = changed_fields(event.previous_snapshot.as_ref(), event.current_snapshot.as_ref())?;
        let template = EntryBody {
            id: EntryId(0),
            created_at: Utc::now().trunc_subsecs(6),
            actor_id: event.actor_id.clone().unwrap_or_else(ActorId::system),
            session_id: event.session_id.clone(),
            operation_type: event.operation_type,
            resource_type: event.resource_type.clone(),
            resource_id: event.resource_id.clone(),
            context: event.context.clone(),
            previous_snapshot: event.previous_snapshot.clone(),
            current_snapshot: event.current_snapshot.clone(),
            changed_fields: changed,
            amount: event.amount,
            currency: event.currency.clone(),
            tax_year: event.tax_year,
            success: event.success,
            error_message: event.error_message.clone(),
        };
        // Reject malformed bodies before touching the store.
        canonicalize(&template)?;
        Ok(Draft { template })
    }

    /// Drive `append_with` until it commits, a non-transient error occurs, or
    /// a retry limit or the wall-clock budget runs out.
    fn commit(&self, draft: &Draft) -> Result<AuditEntry, Failure> {
        let started = Instant::now();
        let budget = self.config.append_budget();
        let mut contention = 0u32;
        let mut persistence = 0u32;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match self.store.append_with(&mut |tip| draft.seal_at(tip)) {
                Ok(entry) => return Ok(entry),
                Err(e) => e,
            };

            let (retry, limit, counter) = match error {
                LedgerError::Contention { .. } => {
                    contention += 1;
                    (contention, self.config.max_contention_retries, &self.counters.contention_retries)
                }
                LedgerError::Persistence { .. } => {
                    persistence += 1;
                    (persistence, self.config.max_persistence_retries, &self.counters.persistence_retries)
                }
                _ => return Err(Failure { error, attempts }),
            };

            if retry > limit {
                return Err(Failure { error, attempts });
            }
            let delay = self.config.backoff(retry);
            if started.elapsed() + delay >= budget {
                debug!(attempts, "append budget exhausted");
                return Err(Failure { error, attempts });
            }

            bump(counter);
            warn!(
                attempt = attempts,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "append failed; retrying"
            );
            thread::sleep(delay);
        }
    }

    fn spill_event(&self, event: AuditEvent, failure: Failure) -> AppendStatus {
        let operation = event.operation_type;
        let reason = failure.error.to_string();
        let record = SpillRecord {
            event,
            reason: reason.clone(),
            attempts: failure.attempts,
            spilled_at: Utc::now(),
        };

        match self.spill.append(&record) {
            Ok(()) => {
                bump(&self.counters.spilled);
                error!(
                    target: "tessera::alert",
                    operation = %operation,
                    attempts = failure.attempts,
                    spill = %self.spill.path().display(),
                    reason = %reason,
                    "audit append spilled"
                );
                AppendStatus::Spilled { reason }
            }
            Err(spill_error) => {
                bump(&self.counters.dropped);
                error!(
                    target: "tessera::alert",
                    operation = %operation,
                    reason = %reason,
                    spill_error = %spill_error,
                    "audit append lost: store and spill file both failed"
                );
                AppendStatus::Dropped {
                    reason: format!("{reason}; {spill_error}"),
                }
            }
        }
    }

    fn drop_event(&self, operation: impl std::fmt::Display, error: LedgerError) -> AppendStatus {
        bump(&self.counters.dropped);
        warn!(operation = %operation, error = %error, "audit event dropped");
        AppendStatus::Dropped {
            reason: error.to_string(),
        }
    }
}

impl AuditRecorder for LedgerWriter {
    fn record_event(&self, event: AuditEvent) -> AppendStatus {
        self.append(event)
    }
}
