//! # tessera-verify
//!
//! Integrity verification for the TESSERA ledger.
//!
//! This crate provides [`engine::IntegrityVerifier`], which replays a window
//! of a live store, or the whole history when given the archived prefix, and
//! reports the first entry whose link or hash does not hold.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tessera_verify::{IntegrityVerifier, VerifyRange, Anchor};
//!
//! let verifier = IntegrityVerifier::new(store.clone());
//! let report = verifier.verify(&VerifyRange::all())?;
//! assert!(report.valid, "{:?}", report.reasons);
//!
//! // After a retention sweep, genesis is no longer the right anchor:
//! let strict = verifier.verify(&VerifyRange::all().with_anchor(Anchor::Genesis))?;
//! assert!(!strict.valid);
//! ```

pub mod engine;

pub use engine::{Anchor, IntegrityVerifier, VerifyRange};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, SubsecRound, Utc};
    use serde_json::json;

    use tessera_config::LedgerConfig;
    use tessera_contracts::{
        entry::{Amount, AuditEntry, ChainTip, Checkpoint},
        error::{LedgerError, LedgerResult},
        event::AuditEvent,
        ids::{ActorId, EntryId},
        operation::OperationType,
        query::{Caller, EntryFilter, Role},
        report::VerifyRequest,
    };
    use tessera_core::{traits::LedgerStore, LedgerWriter};
    use tessera_store::MemoryLedgerStore;

    use super::{Anchor, IntegrityVerifier, VerifyRange};

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        writer: LedgerWriter,
        verifier: IntegrityVerifier,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LedgerConfig::default();
        config.writer.spill_path = dir.path().join("spill.jsonl");
        let store = Arc::new(MemoryLedgerStore::new());
        Fixture {
            writer: LedgerWriter::new(store.clone(), &config),
            verifier: IntegrityVerifier::new(store.clone()),
            store,
            _dir: dir,
        }
    }

    fn append_n(writer: &LedgerWriter, n: usize) {
        for i in 0..n {
            let status = writer.append(
                AuditEvent::new(OperationType::ReceiptUpload)
                    .actor(ActorId::new("A"))
                    .resource("receipt", format!("r-{i}")),
            );
            assert!(status.is_committed());
            // Keep timestamps distinct so date windows select exact entries.
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn entries(store: &MemoryLedgerStore) -> Vec<AuditEntry> {
        store.list(&EntryFilter::default(), 0, None).unwrap()
    }

    fn admin() -> Caller {
        Caller::new(ActorId::new("root"), Role::Administrator)
    }

    /// Purge entries up to and including `through`, returning what was removed.
    fn purge(store: &MemoryLedgerStore, through: u64) -> Vec<AuditEntry> {
        let all = entries(store);
        let removed: Vec<_> = all.into_iter().filter(|e| e.id().0 <= through).collect();
        let last = removed.last().unwrap();
        store
            .purge_through(&Checkpoint {
                checkpoint_hash: last.hash_chain,
                superseded_entry_id: last.id(),
                created_at: Utc::now().trunc_subsecs(6),
            })
            .unwrap();
        removed
    }

    /// Runs one queued purge at the start of each `list`, as a retention
    /// sweep committing mid-verification would.
    struct PurgeDuringList {
        inner: Arc<MemoryLedgerStore>,
        queued: Mutex<VecDeque<u64>>,
    }

    impl PurgeDuringList {
        fn new(inner: Arc<MemoryLedgerStore>, through: impl IntoIterator<Item = u64>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                queued: Mutex::new(through.into_iter().collect()),
            })
        }
    }

    impl LedgerStore for PurgeDuringList {
        fn append_with(
            &self,
            build: &mut dyn FnMut(&ChainTip) -> LedgerResult<AuditEntry>,
        ) -> LedgerResult<AuditEntry> {
            self.inner.append_with(build)
        }

        fn tip(&self) -> LedgerResult<ChainTip> {
            self.inner.tip()
        }

        fn list(&self, filter: &EntryFilter, offset: u64, limit: Option<u64>) -> LedgerResult<Vec<AuditEntry>> {
            let next = self.queued.lock().unwrap().pop_front();
            if let Some(through) = next {
                purge(&self.inner, through);
            }
            self.inner.list(filter, offset, limit)
        }

        fn count(&self, filter: &EntryFilter) -> LedgerResult<u64> {
            self.inner.count(filter)
        }

        fn latest_before(&self, at: DateTime<Utc>) -> LedgerResult<Option<AuditEntry>> {
            self.inner.latest_before(at)
        }

        fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
            self.inner.latest_checkpoint()
        }

        fn checkpoints(&self) -> LedgerResult<Vec<Checkpoint>> {
            self.inner.checkpoints()
        }

        fn purge_through(&self, checkpoint: &Checkpoint) -> LedgerResult<u64> {
            self.inner.purge_through(checkpoint)
        }
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    /// login, goal-create, goal-update: three linked entries, valid chain.
    #[test]
    fn test_three_event_scenario_verifies() {
        let f = fixture();
        let a = ActorId::new("A");
        f.writer.append(AuditEvent::new(OperationType::LoginSuccess).actor(a.clone()));
        f.writer.append(
            AuditEvent::new(OperationType::GoalCreate)
                .actor(a.clone())
                .current(json!({ "amount": 500 }))
                .amount(Amount::from_major(500), "AUD"),
        );
        f.writer.append(
            AuditEvent::new(OperationType::GoalUpdate)
                .actor(a)
                .snapshots(json!({ "amount": 500 }), json!({ "amount": 750 })),
        );

        let report = f.verifier.verify_request(&admin(), &VerifyRequest::default()).unwrap();
        assert!(report.valid, "{:?}", report.reasons);
        assert_eq!(report.entries_checked, 3);
        assert!(report.first_break_id.is_none());
        assert!(report.anchor.is_genesis());
        assert_eq!(entries(&f.store)[2].body.changed_fields, vec!["amount"]);
    }

    #[test]
    fn test_empty_ledger_is_valid() {
        let f = fixture();
        let report = f.verifier.verify(&VerifyRange::all()).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 0);
    }

    #[test]
    fn test_tampered_entry_is_first_break() {
        let f = fixture();
        append_n(&f.writer, 5);

        let mut victim = entries(&f.store)[2].clone();
        victim.body.resource_id = Some("r-forged".to_string());
        f.store.overwrite(victim).unwrap();

        let report = f.verifier.verify(&VerifyRange::all()).unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_break_id, Some(EntryId(3)));
        assert_eq!(report.entries_checked, 3);
        assert!(report.reasons[0].contains("recomputed"), "{:?}", report.reasons);
    }

    #[test]
    fn test_deleted_entry_breaks_its_successor() {
        let f = fixture();
        append_n(&f.writer, 5);
        f.store.remove(EntryId(2)).unwrap();

        let report = f.verifier.verify(&VerifyRange::all()).unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_break_id, Some(EntryId(3)));
    }

    #[test]
    fn test_window_anchors_on_live_predecessor() {
        let f = fixture();
        append_n(&f.writer, 6);
        let all = entries(&f.store);

        let window = VerifyRange {
            start: Some(all[2].created_at()),
            end: Some(all[4].created_at()),
            anchor: Anchor::Auto,
        };
        assert_eq!(f.verifier.resolve_anchor(&window).unwrap(), all[1].hash_chain);

        let report = f.verifier.verify(&window).unwrap();
        assert!(report.valid, "{:?}", report.reasons);
        assert_eq!(report.entries_checked, 2);

        let strict = f.verifier.verify(&window.with_anchor(Anchor::Genesis)).unwrap();
        assert!(!strict.valid);
        assert_eq!(strict.first_break_id, Some(EntryId(3)));
    }

    #[test]
    fn test_explicit_hash_anchor() {
        let f = fixture();
        append_n(&f.writer, 3);
        let all = entries(&f.store);

        let wrong = f
            .verifier
            .verify(&VerifyRange::all().with_anchor(Anchor::Hash(all[0].hash_chain)))
            .unwrap();
        assert!(!wrong.valid);
        assert_eq!(wrong.first_break_id, Some(EntryId(1)));
        assert_eq!(wrong.anchor, all[0].hash_chain);
    }

    #[test]
    fn test_auditor_may_not_verify() {
        let f = fixture();
        let auditor = Caller::new(ActorId::new("aud"), Role::Auditor);
        let err = f.verifier.verify_request(&auditor, &VerifyRequest::default()).unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden { .. }), "{err:?}");
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let f = fixture();
        let now = Utc::now();
        let request = VerifyRequest {
            start_date: Some(now),
            end_date: Some(now - chrono::Duration::days(1)),
        };
        let err = f.verifier.verify_request(&admin(), &request).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRange { .. }));
    }

    // ── After a purge ─────────────────────────────────────────────────────────

    #[test]
    fn test_purged_ledger_verifies_from_checkpoint_only() {
        let f = fixture();
        append_n(&f.writer, 6);
        purge(&f.store, 3);

        let live = f.verifier.verify(&VerifyRange::all()).unwrap();
        assert!(live.valid, "{:?}", live.reasons);
        assert_eq!(live.entries_checked, 3);
        assert_eq!(live.anchor, f.store.latest_checkpoint().unwrap().unwrap().checkpoint_hash);

        let strict = f
            .verifier
            .verify(&VerifyRange::all().with_anchor(Anchor::Genesis))
            .unwrap();
        assert!(!strict.valid);
        assert_eq!(strict.first_break_id, Some(EntryId(4)));
        assert!(strict.reasons.iter().any(|r| r.contains("checkpoint")));
    }

    #[test]
    fn test_history_replays_archive_then_live() {
        let f = fixture();
        append_n(&f.writer, 6);
        let mut archived = purge(&f.store, 2);
        archived.extend(purge(&f.store, 4));
        archived.reverse();

        let report = f.verifier.verify_history(archived.clone()).unwrap();
        assert!(report.valid, "{:?}", report.reasons);
        assert_eq!(report.entries_checked, 6);

        archived.retain(|e| e.id() != EntryId(3));
        let gap = f.verifier.verify_history(archived).unwrap();
        assert!(!gap.valid);
        assert_eq!(gap.first_break_id, Some(EntryId(4)));
    }

    // ── Concurrent retention ──────────────────────────────────────────────────

    #[test]
    fn test_purge_between_anchor_and_listing_is_read_again() {
        let f = fixture();
        append_n(&f.writer, 6);
        let all = entries(&f.store);
        let verifier = IntegrityVerifier::new(PurgeDuringList::new(f.store.clone(), [3]));

        let report = verifier.verify(&VerifyRange::all()).unwrap();
        assert!(report.valid, "{:?}", report.reasons);
        assert_eq!(report.entries_checked, 3);
        assert_eq!(report.anchor, all[2].hash_chain);
    }

    #[test]
    fn test_ledger_purged_on_every_read_is_contention() {
        let f = fixture();
        append_n(&f.writer, 8);
        let verifier = IntegrityVerifier::new(PurgeDuringList::new(f.store.clone(), 1..=5));

        let err = verifier.verify(&VerifyRange::all()).unwrap_err();
        assert!(matches!(err, LedgerError::Contention { .. }), "{err:?}");
    }

    #[test]
    fn test_history_replays_identical_copies_once() {
        let f = fixture();
        append_n(&f.writer, 4);
        let first = purge(&f.store, 2);

        let mut archived = first.clone();
        archived.extend(first.clone());
        archived.extend(entries(&f.store));
        let report = f.verifier.verify_history(archived).unwrap();
        assert!(report.valid, "{:?}", report.reasons);
        assert_eq!(report.entries_checked, 4);

        let mut archived = first;
        archived.extend(purge(&f.store, 3));
        let mut forged = archived[2].clone();
        forged.body.resource_id = Some("r-forged".to_string());
        archived.push(forged);

        let report = f.verifier.verify_history(archived).unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_break_id, Some(EntryId(3)));
    }
}
