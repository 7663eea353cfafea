//! # tessera-core
//!
//! The write and read paths of the TESSERA ledger.
//!
//! This crate provides:
//! - The trait seams (`AuditRecorder`, `LedgerStore`, `ArchiveSink`)
//! - `LedgerWriter`, the only code that appends to a store
//! - `QueryService`, role-aware listing for reporting callers
//! - Snapshot redaction and changed-field detection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_core::{LedgerWriter, traits::AuditRecorder};
//!
//! let writer = LedgerWriter::new(store, &config);
//! let status = writer.record_event(
//!     AuditEvent::new(OperationType::GoalUpdate)
//!         .actor(ActorId::new("user-7"))
//!         .snapshots(json!({ "amount": 500 }), json!({ "amount": 750 })),
//! );
//! ```
//!
//! `record_event` cannot fail.  Inspect the returned `AppendStatus` or
//! `LedgerWriter::health()` to see whether events are being spilled.

pub mod diff;
pub mod query;
pub mod redact;
pub mod spill;
pub mod traits;
pub mod writer;

pub use diff::changed_fields;
pub use query::QueryService;
pub use redact::Redactor;
pub use spill::{SpillFile, SpillRecord};
pub use writer::{LedgerWriter, ReconcileReport, WriterHealth};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::json;

    use tessera_chain::verify_links;
    use tessera_config::LedgerConfig;
    use tessera_contracts::{
        entry::{Amount, AuditEntry, ChainTip, Checkpoint, RequestContext},
        error::{LedgerError, LedgerResult},
        event::AuditEvent,
        ids::{ActorId, ChainHash, EntryId},
        operation::OperationType,
        query::{Caller, EntryFilter, PageRequest, Role},
        report::AppendStatus,
    };

    use crate::{
        traits::{AuditRecorder, LedgerStore},
        LedgerWriter, QueryService,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Vec-backed store that can be told to fail or to report contention.
    #[derive(Default)]
    struct MockStore {
        entries: Mutex<Vec<AuditEntry>>,
        fail: AtomicBool,
        contend: AtomicU32,
        calls: AtomicU32,
        /// Call number on which `append_with` panics; zero never.
        crash_on_call: AtomicU32,
    }

    impl MockStore {
        fn failing() -> Self {
            let store = Self::default();
            store.fail.store(true, Ordering::SeqCst);
            store
        }

        fn contended(times: u32) -> Self {
            let store = Self::default();
            store.contend.store(times, Ordering::SeqCst);
            store
        }

        fn entries(&self) -> Vec<AuditEntry> {
            self.entries.lock().clone()
        }

        fn push_raw(&self, entry: AuditEntry) {
            self.entries.lock().push(entry);
        }
    }

    impl LedgerStore for MockStore {
        fn append_with(
            &self,
            build: &mut dyn FnMut(&ChainTip) -> LedgerResult<AuditEntry>,
        ) -> LedgerResult<AuditEntry> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.crash_on_call.load(Ordering::SeqCst) {
                panic!("store process died on call {call}");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(LedgerError::Persistence {
                    reason: "database is offline".to_string(),
                });
            }
            if self
                .contend
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LedgerError::Contention {
                    reason: "tip moved".to_string(),
                });
            }
            let mut entries = self.entries.lock();
            let tip = ChainTip::resolve(entries.last(), None);
            let entry = build(&tip)?;
            entries.push(entry.clone());
            Ok(entry)
        }

        fn tip(&self) -> LedgerResult<ChainTip> {
            Ok(ChainTip::resolve(self.entries.lock().last(), None))
        }

        fn list(&self, filter: &EntryFilter, offset: u64, limit: Option<u64>) -> LedgerResult<Vec<AuditEntry>> {
            let entries = self.entries.lock();
            let matching = entries.iter().filter(|e| filter.matches(e)).skip(offset as usize);
            Ok(match limit {
                Some(n) => matching.take(n as usize).cloned().collect(),
                None => matching.cloned().collect(),
            })
        }

        fn count(&self, filter: &EntryFilter) -> LedgerResult<u64> {
            Ok(self.entries.lock().iter().filter(|e| filter.matches(e)).count() as u64)
        }

        fn latest_before(&self, at: DateTime<Utc>) -> LedgerResult<Option<AuditEntry>> {
            Ok(self.entries.lock().iter().rev().find(|e| e.created_at() < at).cloned())
        }

        fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
            Ok(None)
        }

        fn checkpoints(&self) -> LedgerResult<Vec<Checkpoint>> {
            Ok(Vec::new())
        }

        fn purge_through(&self, _checkpoint: &Checkpoint) -> LedgerResult<u64> {
            Ok(0)
        }
    }

    fn config_in(dir: &Path) -> LedgerConfig {
        let mut config = LedgerConfig::default();
        config.writer.spill_path = dir.join("spill.jsonl");
        config.writer.append_budget_ms = 500;
        config
    }

    fn writer_over(store: &Arc<MockStore>, config: &LedgerConfig) -> LedgerWriter {
        LedgerWriter::new(store.clone(), config)
    }

    fn user(id: &str) -> ActorId {
        ActorId::new(id)
    }

    // ── Append path ───────────────────────────────────────────────────────────

    #[test]
    fn test_three_event_scenario_links_and_diffs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let writer = writer_over(&store, &config_in(dir.path()));

        let statuses = [
            writer.append(AuditEvent::new(OperationType::LoginSuccess).actor(user("A"))),
            writer.append(
                AuditEvent::new(OperationType::GoalCreate)
                    .actor(user("A"))
                    .resource("goal", "g-1")
                    .current(json!({ "amount": 500 }))
                    .amount(Amount::from_major(500), "AUD"),
            ),
            writer.append(
                AuditEvent::new(OperationType::GoalUpdate)
                    .actor(user("A"))
                    .resource("goal", "g-1")
                    .snapshots(json!({ "amount": 500 }), json!({ "amount": 750 })),
            ),
        ];

        let ids: Vec<_> = statuses.iter().map(|s| s.entry_id()).collect();
        assert_eq!(ids, vec![Some(EntryId(1)), Some(EntryId(2)), Some(EntryId(3))]);

        let entries = store.entries();
        assert!(entries[0].previous_hash.is_genesis());
        assert_eq!(entries[1].previous_hash, entries[0].hash_chain);
        assert_eq!(entries[2].previous_hash, entries[1].hash_chain);
        assert_eq!(entries[2].body.changed_fields, vec!["amount"]);
        assert_eq!(entries[1].body.amount.map(|a| a.to_string()).as_deref(), Some("500.00"));

        let report = verify_links(&entries, ChainHash::GENESIS);
        assert!(report.valid, "{:?}", report.reasons);
        assert_eq!(report.entries_checked, 3);
        assert_eq!(writer.health().committed, 3);
    }

    #[test]
    fn test_denylisted_values_never_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let writer = writer_over(&store, &config_in(dir.path()));

        let status = writer.append(
            AuditEvent::new(OperationType::PasswordChange)
                .actor(user("A"))
                .snapshots(
                    json!({ "password": "old-secret-1", "email": "a@example.com" }),
                    json!({ "password": "new-secret-2", "email": "a@example.com" }),
                ),
        );
        assert!(status.is_committed());

        let stored = serde_json::to_string(&store.entries()).unwrap();
        assert!(!stored.contains("old-secret-1"));
        assert!(!stored.contains("new-secret-2"));
        // Both sides carry the same mask, so the change itself is invisible.
        assert!(store.entries()[0].body.changed_fields.is_empty());
    }

    #[test]
    fn test_missing_actor_and_blank_context_get_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let writer = writer_over(&store, &config_in(dir.path()));

        writer.append(
            AuditEvent::new(OperationType::GstCalculation)
                .actor(ActorId::new("  "))
                .context(RequestContext::http("POST", "").with_ip("")),
        );

        let body = &store.entries()[0].body;
        assert!(body.actor_id.is_system());
        assert_eq!(body.context.ip_address, "unknown");
        assert_eq!(body.context.endpoint, "system");
        assert_eq!(body.context.http_method, "POST");
    }

    #[test]
    fn test_created_at_never_precedes_tip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let writer = writer_over(&store, &config_in(dir.path()));

        writer.append(AuditEvent::new(OperationType::Logout));
        let mut future = store.entries()[0].clone();
        future.body.id = EntryId(2);
        future.body.created_at = Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap();
        store.push_raw(future.clone());

        writer.append(AuditEvent::new(OperationType::Logout));
        let entries = store.entries();
        assert_eq!(entries[2].id(), EntryId(3));
        assert_eq!(entries[2].created_at(), future.created_at());
    }

    #[test]
    fn test_malformed_event_is_dropped_without_touching_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let writer = writer_over(&store, &config_in(dir.path()));

        let mut event = AuditEvent::new(OperationType::TaxEstimate);
        event.amount = Some(Amount::from_major(10));

        let status = writer.append(event);
        assert!(matches!(status, AppendStatus::Dropped { .. }), "{status:?}");
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(writer.health().dropped, 1);
        assert!(writer.spill_file().is_empty().unwrap());
    }

    #[test]
    fn test_contention_is_retried_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::contended(3));
        let writer = writer_over(&store, &config_in(dir.path()));

        let status = writer.append(AuditEvent::new(OperationType::ReceiptUpload));
        assert_eq!(status, AppendStatus::Committed { id: EntryId(1) });
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
        assert_eq!(writer.health().contention_retries, 3);
    }

    #[test]
    fn test_failing_store_returns_within_budget_and_spills() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::failing());
        let config = config_in(dir.path());
        let writer = writer_over(&store, &config);

        let started = Instant::now();
        let status = writer.record_event(
            AuditEvent::new(OperationType::PasswordReset)
                .actor(user("A"))
                .current(json!({ "reset_token": "rt-secret" })),
        );
        let elapsed = started.elapsed();

        assert!(matches!(status, AppendStatus::Spilled { .. }), "{status:?}");
        assert!(elapsed < config.writer.append_budget() + Duration::from_millis(250), "{elapsed:?}");
        assert_eq!(
            store.calls.load(Ordering::SeqCst),
            config.writer.max_persistence_retries + 1
        );

        let health = writer.health();
        assert_eq!(health.spilled, 1);
        assert_eq!(health.persistence_retries, u64::from(config.writer.max_persistence_retries));

        let spilled = std::fs::read_to_string(&config.writer.spill_path).unwrap();
        assert!(!spilled.contains("rt-secret"));
    }

    #[test]
    fn test_wall_clock_budget_cuts_retries_short() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::failing());
        let mut config = config_in(dir.path());
        config.writer.max_persistence_retries = 1_000;
        config.writer.backoff_base_ms = 20;
        config.writer.backoff_max_ms = 20;
        config.writer.append_budget_ms = 100;
        let writer = writer_over(&store, &config);

        let started = Instant::now();
        let status = writer.append(AuditEvent::new(OperationType::Logout));
        assert!(matches!(status, AppendStatus::Spilled { .. }));
        assert!(started.elapsed() < Duration::from_millis(350));
        assert!(store.calls.load(Ordering::SeqCst) < 10);
    }

    #[test]
    fn test_spill_failure_is_reported_as_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::failing());
        let mut config = config_in(dir.path());
        config.writer.spill_path = dir.path().join("no-such-dir").join("spill.jsonl");
        let writer = writer_over(&store, &config);

        let status = writer.append(AuditEvent::new(OperationType::Logout));
        match status {
            AppendStatus::Dropped { reason } => assert!(reason.contains("spill"), "{reason}"),
            other => panic!("expected Dropped, got {:?}", other),
        }
        assert_eq!(writer.health().dropped, 1);
    }

    // ── Spill reconciliation ──────────────────────────────────────────────────

    #[test]
    fn test_reconcile_replays_spilled_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::failing());
        let writer = writer_over(&store, &config_in(dir.path()));

        writer.append(AuditEvent::new(OperationType::LoginFailed).actor(user("A")));
        writer.append(AuditEvent::new(OperationType::LoginSuccess).actor(user("A")));
        assert_eq!(writer.spill_file().len().unwrap(), 2);

        store.fail.store(false, Ordering::SeqCst);
        let report = writer.reconcile_spill().unwrap();

        assert_eq!(report.replayed, 2);
        assert_eq!(report.remaining, 0);
        assert!(writer.spill_file().is_empty().unwrap());

        let entries = store.entries();
        assert_eq!(entries[0].body.operation_type, OperationType::LoginFailed);
        assert_eq!(entries[1].body.operation_type, OperationType::LoginSuccess);
        assert!(verify_links(&entries, ChainHash::GENESIS).valid);
        assert_eq!(writer.health().replayed, 2);
    }

    #[test]
    fn test_reconcile_keeps_events_while_store_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::failing());
        let writer = writer_over(&store, &config_in(dir.path()));

        for _ in 0..3 {
            writer.append(AuditEvent::new(OperationType::Logout));
        }
        let report = writer.reconcile_spill().unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 3);

        let kept = writer.spill_file().records().unwrap();
        assert_eq!(kept.len(), 3);
        assert!(kept[0].attempts > kept[1].attempts, "only the first record was retried");
    }

    #[test]
    fn test_interrupted_reconcile_keeps_every_record_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::failing());
        let writer = writer_over(&store, &config_in(dir.path()));
        for op in [OperationType::LoginFailed, OperationType::LoginSuccess, OperationType::Logout] {
            writer.append(AuditEvent::new(op).actor(user("A")));
        }

        store.fail.store(false, Ordering::SeqCst);
        let calls = store.calls.load(Ordering::SeqCst);
        store.crash_on_call.store(calls + 2, Ordering::SeqCst);
        let crashed = std::panic::catch_unwind(AssertUnwindSafe(|| writer.reconcile_spill()));
        assert!(crashed.is_err());
        assert_eq!(store.entries().len(), 1);
        assert_eq!(writer.spill_file().len().unwrap(), 3);

        let report = writer.reconcile_spill().unwrap();
        assert_eq!(report.replayed, 3);
        assert_eq!(report.remaining, 0);
        assert!(writer.spill_file().is_empty().unwrap());

        // The record committed before the crash is delivered twice, never zero times.
        let entries = store.entries();
        let ops: Vec<_> = entries.iter().map(|e| e.body.operation_type).collect();
        assert_eq!(
            ops,
            vec![
                OperationType::LoginFailed,
                OperationType::LoginFailed,
                OperationType::LoginSuccess,
                OperationType::Logout
            ]
        );
        assert!(verify_links(&entries, ChainHash::GENESIS).valid);
    }

    #[test]
    fn test_reconcile_with_empty_spill_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let writer = writer_over(&store, &config_in(dir.path()));
        assert_eq!(writer.reconcile_spill().unwrap().replayed, 0);
        assert!(store.entries().is_empty());
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    fn seeded_query(extra: Vec<OperationType>) -> (Arc<MockStore>, QueryService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let mut config = config_in(dir.path());
        config.query.max_page_size = 2;
        config.query.default_page_size = 2;
        config.query.extra_sensitive_operations = extra;
        let writer = writer_over(&store, &config);

        writer.append(
            AuditEvent::new(OperationType::PasswordChange)
                .actor(user("A"))
                .snapshots(json!({ "email": "old@example.com" }), json!({ "email": "new@example.com" })),
        );
        writer.append(
            AuditEvent::new(OperationType::GoalDelete)
                .actor(user("B"))
                .previous(json!({ "name": "holiday" })),
        );
        writer.append(
            AuditEvent::new(OperationType::GoalCreate)
                .actor(user("A"))
                .current(json!({ "name": "car" })),
        );

        let query = QueryService::new(store.clone() as Arc<dyn LedgerStore>, &config.query);
        (store, query, dir)
    }

    #[test]
    fn test_auditor_sees_sensitive_snapshots_withheld() {
        let (_store, query, _dir) = seeded_query(Vec::new());
        let auditor = Caller::new(user("aud"), Role::Auditor);

        let page = query.list(&auditor, &EntryFilter::default(), None).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].snapshots_withheld);
        assert!(page.items[0].body.current_snapshot.is_none());
        assert!(!page.items[1].snapshots_withheld);
        assert!(page.items[1].body.previous_snapshot.is_some());
    }

    #[test]
    fn test_administrator_sees_every_snapshot() {
        let (_store, query, _dir) = seeded_query(vec![OperationType::GoalDelete]);
        let admin = Caller::new(user("root"), Role::Administrator);

        let page = query.list(&admin, &EntryFilter::default(), None).unwrap();
        assert!(page.items.iter().all(|v| !v.snapshots_withheld));
        assert_eq!(page.items[0].body.current_snapshot, Some(json!({ "email": "new@example.com" })));
    }

    #[test]
    fn test_extra_sensitive_operations_are_masked() {
        let (_store, query, _dir) = seeded_query(vec![OperationType::GoalDelete]);
        let auditor = Caller::new(user("aud"), Role::Auditor);
        assert!(query.is_sensitive(OperationType::GoalDelete));

        let filter = EntryFilter {
            operation_type: Some(OperationType::GoalDelete),
            ..EntryFilter::default()
        };
        let page = query.list(&auditor, &filter, None).unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items[0].snapshots_withheld);
    }

    #[test]
    fn test_paging_and_actor_filter() {
        let (_store, query, _dir) = seeded_query(Vec::new());
        let admin = Caller::new(user("root"), Role::Administrator);

        let second = query
            .list(&admin, &EntryFilter::default(), Some(PageRequest::new(2, 100)))
            .unwrap();
        assert_eq!(second.page_size, 2, "page size is clamped to the configured maximum");
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].body.id, EntryId(3));

        let only_a = EntryFilter {
            actor_id: Some(user("A")),
            ..EntryFilter::default()
        };
        let page = query.list(&admin, &only_a, Some(PageRequest::new(0, 0))).unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 1);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let (_store, query, _dir) = seeded_query(Vec::new());
        let admin = Caller::new(user("root"), Role::Administrator);
        let at = Utc::now();
        let filter = EntryFilter {
            from: Some(at),
            to: Some(at),
            ..EntryFilter::default()
        };
        assert!(matches!(
            query.list(&admin, &filter, None),
            Err(LedgerError::InvalidRange { .. })
        ));
    }
}
