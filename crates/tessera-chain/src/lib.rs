//! # tessera-chain
//!
//! Canonical serialization and SHA-256 hash chaining for ledger entries.
//!
//! ## Overview
//!
//! Every committed entry stores `hash_chain = SHA-256(canonicalize(body) ‖
//! previous_hash)`.  Tampering with any field of any entry, or reordering or
//! deleting entries, breaks the chain and is detected by `verify_links`.
//! Nothing here performs I/O; the same functions run on the write path and in
//! offline verification.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_chain::{seal, verify_links};
//! use tessera_contracts::ids::ChainHash;
//!
//! let first = seal(body_1, ChainHash::GENESIS)?;
//! let second = seal(body_2, first.hash_chain)?;
//! assert!(verify_links([&first, &second], ChainHash::GENESIS).valid);
//! ```

pub mod canonical;
pub mod chain;

pub use canonical::{canonical_json, canonicalize};
pub use chain::{compute_hash, recompute, seal, verify_links};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use tessera_contracts::{
        entry::{Amount, AuditEntry, EntryBody, RequestContext},
        error::LedgerError,
        ids::{ActorId, ChainHash, EntryId},
        operation::OperationType,
    };

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Build a minimal body with a distinguishable id.
    fn body(id: u64, op: OperationType) -> EntryBody {
        EntryBody {
            id: EntryId(id),
            created_at: Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap() + Duration::seconds(id as i64),
            actor_id: ActorId::new("user-a"),
            session_id: Some("sess-1".to_string()),
            operation_type: op,
            resource_type: None,
            resource_id: None,
            context: RequestContext::http("POST", "/api/goals").with_ip("10.0.0.1"),
            previous_snapshot: None,
            current_snapshot: None,
            changed_fields: vec![],
            amount: None,
            currency: None,
            tax_year: None,
            success: true,
            error_message: None,
        }
    }

    /// Seal `n` bodies into a chain starting at genesis.
    fn chain_of(n: u64) -> Vec<AuditEntry> {
        let mut out: Vec<AuditEntry> = Vec::new();
        for id in 1..=n {
            let previous = out.last().map_or(ChainHash::GENESIS, |e| e.hash_chain);
            out.push(seal(body(id, OperationType::GoalCreate), previous).unwrap());
        }
        out
    }

    // ── Canonicalizer ─────────────────────────────────────────────────────────

    /// Snapshot key insertion order must not affect the canonical bytes.
    #[test]
    fn test_canonical_ignores_key_order() {
        let mut a = body(1, OperationType::GoalUpdate);
        let mut b = a.clone();
        a.current_snapshot = Some(json!({ "amount": 750, "name": "holiday", "meta": { "z": 1, "a": 2 } }));
        let mut reordered = serde_json::Map::new();
        reordered.insert("meta".into(), json!({ "a": 2, "z": 1 }));
        reordered.insert("name".into(), json!("holiday"));
        reordered.insert("amount".into(), json!(750));
        b.current_snapshot = Some(serde_json::Value::Object(reordered));

        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    /// A snapshot present with JSON null must differ from an absent snapshot.
    #[test]
    fn test_null_and_absent_do_not_collide() {
        let absent = body(1, OperationType::GoalDelete);
        let mut null = absent.clone();
        null.current_snapshot = Some(serde_json::Value::Null);

        assert_ne!(canonicalize(&absent).unwrap(), canonicalize(&null).unwrap());
    }

    /// Moving bytes between adjacent fields must change the encoding.
    #[test]
    fn test_adjacent_fields_are_unambiguous() {
        let mut a = body(1, OperationType::GoalCreate);
        a.resource_type = Some("goal".to_string());
        a.resource_id = Some("s-1".to_string());
        let mut b = a.clone();
        b.resource_type = Some("goals".to_string());
        b.resource_id = Some("-1".to_string());

        assert_ne!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn test_canonical_is_stable_across_calls() {
        let mut b = body(7, OperationType::GstCalculation);
        b.amount = Some(Amount::from_minor(12_345));
        b.currency = Some("AUD".to_string());
        b.tax_year = Some(2025);
        assert_eq!(canonicalize(&b).unwrap(), canonicalize(&b.clone()).unwrap());
    }

    #[test]
    fn test_malformed_bodies_are_rejected() {
        let mut no_currency = body(1, OperationType::GoalCreate);
        no_currency.amount = Some(Amount::from_major(500));
        assert!(matches!(canonicalize(&no_currency), Err(LedgerError::Malformed { .. })));

        let mut bad_currency = no_currency.clone();
        bad_currency.currency = Some("aud".to_string());
        assert!(canonicalize(&bad_currency).is_err());

        let mut scalar_snapshot = body(1, OperationType::GoalCreate);
        scalar_snapshot.current_snapshot = Some(json!(42));
        assert!(canonicalize(&scalar_snapshot).is_err());

        let mut success_with_error = body(1, OperationType::LoginSuccess);
        success_with_error.error_message = Some("boom".to_string());
        assert!(canonicalize(&success_with_error).is_err());

        let mut orphan_id = body(1, OperationType::ReceiptUpload);
        orphan_id.resource_id = Some("r-9".to_string());
        assert!(canonicalize(&orphan_id).is_err());

        let mut nanos = body(1, OperationType::GoalCreate);
        nanos.created_at = nanos.created_at + Duration::nanoseconds(1);
        assert!(canonicalize(&nanos).is_err());
    }

    // ── ChainBuilder ──────────────────────────────────────────────────────────

    /// The previous hash participates as raw bytes: flipping one bit changes
    /// the result.
    #[test]
    fn test_compute_hash_commits_to_previous() {
        let canonical = canonicalize(&body(1, OperationType::Logout)).unwrap();
        let mut bytes = [0u8; 32];
        let a = compute_hash(&canonical, &ChainHash::from_bytes(bytes));
        bytes[31] = 1;
        let b = compute_hash(&canonical, &ChainHash::from_bytes(bytes));
        assert_ne!(a, b);
    }

    #[test]
    fn test_recompute_matches_seal() {
        for entry in chain_of(5) {
            assert_eq!(recompute(&entry).unwrap(), entry.hash_chain);
        }
    }

    // ── Replay ────────────────────────────────────────────────────────────────

    #[test]
    fn test_hash_chain_integrity() {
        let chain = chain_of(3);
        assert_eq!(chain[0].previous_hash, ChainHash::GENESIS);
        assert_eq!(chain[1].previous_hash, chain[0].hash_chain);
        assert_eq!(chain[2].previous_hash, chain[1].hash_chain);

        let report = verify_links(&chain, ChainHash::GENESIS);
        assert!(report.valid);
        assert_eq!(report.entries_checked, 3);
        assert!(report.reasons.is_empty());
    }

    /// Mutating a stored field breaks exactly that entry's hash check.
    #[test]
    fn test_tamper_detection() {
        let mut chain = chain_of(4);
        chain[1].body.actor_id = ActorId::new("mallory");

        let report = verify_links(&chain, ChainHash::GENESIS);
        assert!(!report.valid);
        assert_eq!(report.first_break_id, Some(EntryId(2)));
        assert_eq!(report.entries_checked, 2, "replay must stop at the first break");
        assert!(report.reasons[0].contains("recomputed"));
    }

    /// Removing an entry from the middle is reported at its successor.
    #[test]
    fn test_deletion_detection() {
        let mut chain = chain_of(4);
        chain.remove(2);

        let report = verify_links(&chain, ChainHash::GENESIS);
        assert_eq!(report.first_break_id, Some(EntryId(4)));
        assert!(report.reasons[0].contains("previous_hash"));
    }

    #[test]
    fn test_reorder_detection() {
        let mut chain = chain_of(3);
        chain.swap(1, 2);

        let report = verify_links(&chain, ChainHash::GENESIS);
        assert!(!report.valid);
        assert_eq!(report.first_break_id, Some(EntryId(3)));
    }

    /// A suffix verifies from its predecessor's hash but not from genesis.
    #[test]
    fn test_suffix_needs_anchor() {
        let chain = chain_of(5);
        let suffix = &chain[2..];

        let anchored = verify_links(suffix, chain[1].hash_chain);
        assert!(anchored.valid);
        assert_eq!(anchored.anchor, chain[1].hash_chain);

        let from_genesis = verify_links(suffix, ChainHash::GENESIS);
        assert_eq!(from_genesis.first_break_id, Some(EntryId(3)));
        assert!(from_genesis.reasons.iter().any(|r| r.contains("checkpoint")));
    }

    #[test]
    fn test_verify_empty() {
        let report = verify_links(std::iter::empty(), ChainHash::GENESIS);
        assert!(report.valid);
        assert_eq!(report.entries_checked, 0);
    }
}
