//! A guided run over a throwaway ledger.
//!
//! Records a short user session, reads it back as an auditor and as an
//! administrator, verifies the chain, then sweeps the oldest entries into a
//! temporary archive and shows how verification anchors change.

use std::sync::Arc;

use serde_json::json;

use tessera_config::LedgerConfig;
use tessera_contracts::{
    entry::{Amount, AuditEntry, RequestContext},
    error::LedgerResult,
    event::AuditEvent,
    ids::ActorId,
    operation::OperationType,
    query::{Caller, EntryFilter, Role},
};
use tessera_core::{traits::LedgerStore, LedgerWriter, QueryService};
use tessera_retention::{read_archive_dir, JsonlArchiveSink, RetentionArchiver};
use tessera_store::MemoryLedgerStore;
use tessera_verify::{Anchor, IntegrityVerifier, VerifyRange};

pub fn run(config: &LedgerConfig) -> LedgerResult<()> {
    let scratch = std::env::temp_dir().join(format!("tessera-demo-{}", uuid::Uuid::new_v4()));
    let mut config = config.clone();
    config.writer.spill_path = scratch.join("spill.jsonl");
    config.retention.archive_dir = scratch.join("archive");

    print_banner();

    let store = Arc::new(MemoryLedgerStore::new());
    let writer = LedgerWriter::new(store.clone(), &config);

    // ── 1. Record ─────────────────────────────────────────────────────────────

    println!("=== Step 1: Record a session ===");
    println!();
    let alice = ActorId::new("user-alice");
    let web = RequestContext::http("POST", "/api/goals").with_ip("203.0.113.7");
    let events = [
        AuditEvent::new(OperationType::LoginSuccess)
            .actor(alice.clone())
            .session("sess-1")
            .context(RequestContext::http("POST", "/api/auth/login")),
        AuditEvent::new(OperationType::GoalCreate)
            .actor(alice.clone())
            .session("sess-1")
            .resource("goal", "goal-42")
            .current(json!({ "name": "House deposit", "amount": 500 }))
            .amount(Amount::from_major(500), "AUD")
            .context(web.clone()),
        AuditEvent::new(OperationType::GoalUpdate)
            .actor(alice.clone())
            .session("sess-1")
            .resource("goal", "goal-42")
            .snapshots(
                json!({ "name": "House deposit", "amount": 500 }),
                json!({ "name": "House deposit", "amount": 750 }),
            )
            .amount(Amount::from_major(750), "AUD")
            .context(web),
        AuditEvent::new(OperationType::PasswordChange)
            .actor(alice.clone())
            .session("sess-1")
            .resource("user", "user-alice")
            .snapshots(
                json!({ "password_hash": "$argon2id$old", "email": "alice@example.com" }),
                json!({ "password_hash": "$argon2id$new", "email": "alice@example.com" }),
            ),
        AuditEvent::new(OperationType::GstCalculation)
            .resource_type("calculation")
            .current(json!({ "taxable": "110.00", "gst": "10.00" }))
            .amount(Amount::from_minor(1_000), "AUD")
            .tax_year(2026),
    ];
    for event in events {
        let status = writer.append(event);
        println!("  append -> {:?}", status);
    }
    println!();
    for entry in entries(store.as_ref())? {
        print_entry(&entry);
    }
    println!();

    // ── 2. Query ──────────────────────────────────────────────────────────────

    println!("=== Step 2: Query as auditor and administrator ===");
    println!();
    let query = QueryService::new(store.clone(), &config.query);
    let password_changes = EntryFilter {
        operation_type: Some(OperationType::PasswordChange),
        ..EntryFilter::default()
    };
    for caller in [
        Caller::new(ActorId::new("auditor-1"), Role::Auditor),
        Caller::new(ActorId::new("admin-1"), Role::Administrator),
    ] {
        let page = query.list(&caller, &password_changes, None)?;
        for view in &page.items {
            println!(
                "  {:?} sees password-change #{}: withheld={} current={}",
                caller.role,
                view.body.id,
                view.snapshots_withheld,
                view.body
                    .current_snapshot
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |v| v.to_string())
            );
        }
    }
    println!();

    // ── 3. Verify ─────────────────────────────────────────────────────────────

    println!("=== Step 3: Verify the live chain ===");
    println!();
    let verifier = IntegrityVerifier::new(store.clone());
    let report = verifier.verify(&VerifyRange::all())?;
    println!("  valid={} checked={} anchor={}", report.valid, report.entries_checked, short(&report.anchor.to_hex()));
    println!();

    // ── 4. Retention ──────────────────────────────────────────────────────────

    println!("=== Step 4: Retention sweep ===");
    println!();
    let live = entries(store.as_ref())?;
    let cutoff = live.get(2).map(AuditEntry::created_at).unwrap_or_else(chrono::Utc::now);
    let sink = Arc::new(JsonlArchiveSink::from_config(&config.retention));
    let archiver = RetentionArchiver::new(store.clone(), sink);
    let sweep = archiver.sweep_before(cutoff)?;
    println!("  archived={} purged={}", sweep.archived, sweep.purged);
    if let (Some(checkpoint), Some(location)) = (&sweep.checkpoint, &sweep.archive_location) {
        println!(
            "  checkpoint after #{}: {}",
            checkpoint.superseded_entry_id,
            short(&checkpoint.checkpoint_hash.to_hex())
        );
        println!("  archive: {location}");
    }

    let from_checkpoint = verifier.verify(&VerifyRange::all())?;
    println!(
        "  live chain from checkpoint: valid={} checked={}",
        from_checkpoint.valid, from_checkpoint.entries_checked
    );
    let from_genesis = verifier.verify(&VerifyRange::all().with_anchor(Anchor::Genesis))?;
    println!(
        "  live chain from genesis:    valid={} first_break={:?}",
        from_genesis.valid,
        from_genesis.first_break_id.map(|id| id.0)
    );

    let archived = read_archive_dir(&config.retention.archive_dir)?
        .into_iter()
        .flat_map(|segment| segment.entries);
    let history = verifier.verify_history(archived)?;
    println!(
        "  archive + live from genesis: valid={} checked={}",
        history.valid, history.entries_checked
    );
    println!();

    let health = writer.health();
    println!(
        "Writer health: committed={} spilled={} dropped={}",
        health.committed, health.spilled, health.dropped
    );
    println!("Scratch files left in {}", scratch.display());
    Ok(())
}

// ── Output ────────────────────────────────────────────────────────────────────

fn entries(store: &dyn LedgerStore) -> LedgerResult<Vec<AuditEntry>> {
    store.list(&EntryFilter::default(), 0, None)
}

fn print_entry(entry: &AuditEntry) {
    println!(
        "  #{:<2} {:<16} actor={:<11} prev={} hash={} changed={:?}",
        entry.id().0,
        entry.body.operation_type.as_str(),
        entry.body.actor_id.as_str(),
        short(&entry.previous_hash.to_hex()),
        short(&entry.hash_chain.to_hex()),
        entry.body.changed_fields
    );
}

fn short(hex: &str) -> &str {
    &hex[..hex.len().min(12)]
}

fn print_banner() {
    println!();
    println!("TESSERA: Tamper-evident Audit Ledger");
    println!("====================================");
    println!();
    println!("Every append:");
    println!("  [1] redacts denylisted fields from both snapshots");
    println!("  [2] diffs the snapshots into changed_fields");
    println!("  [3] reads the chain tip and links to its hash inside one transaction");
    println!("  [4] hashes SHA-256(canonical body || previous hash)");
    println!();
}
