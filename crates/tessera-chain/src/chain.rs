//! Hash-chain primitives: sealing entries and replaying links.
//!
//! Hash input layout (bytes, in order):
//!   1. `canonicalize(body)`
//!   2. `previous_hash` as its raw 32 bytes
//!
//! The previous hash always occupies the final fixed-width 32 bytes, so no
//! split of the input between the two parts is ambiguous.

use sha2::{Digest, Sha256};
use tracing::warn;

use tessera_contracts::{
    entry::{AuditEntry, EntryBody},
    error::LedgerResult,
    ids::ChainHash,
    report::VerificationReport,
};

use crate::canonical::canonicalize;

/// SHA-256 over `canonical` followed by the raw bytes of `previous`.
pub fn compute_hash(canonical: &[u8], previous: &ChainHash) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(previous.as_bytes());
    ChainHash::from_bytes(hasher.finalize().into())
}

/// Canonicalize `body` and link it to `previous`, producing the entry to persist.
///
/// # Errors
///
/// Propagates `LedgerError::Malformed` from the canonicalizer.
pub fn seal(body: EntryBody, previous: ChainHash) -> LedgerResult<AuditEntry> {
    let canonical = canonicalize(&body)?;
    let hash_chain = compute_hash(&canonical, &previous);
    Ok(AuditEntry {
        body,
        previous_hash: previous,
        hash_chain,
    })
}

/// Recompute an entry's `hash_chain` from its stored fields alone.
///
/// # Errors
///
/// Returns `LedgerError::Malformed` if the stored body no longer
/// canonicalizes, which itself indicates tampering.
pub fn recompute(entry: &AuditEntry) -> LedgerResult<ChainHash> {
    let canonical = canonicalize(&entry.body)?;
    Ok(compute_hash(&canonical, &entry.previous_hash))
}

/// Replay `entries` (already in total order) starting from `anchor`.
///
/// For each entry:
///
/// 1. **Linkage**: `previous_hash` must equal the expected hash (the anchor
///    for the first entry, the predecessor's `hash_chain` afterwards).
/// 2. **Ordering**: ids must strictly increase.
/// 3. **Hash correctness**: `hash_chain` must match the recomputed value.
///
/// Replay stops at the first entry failing any rule; everything after a
/// broken link is uninformative.  An empty sequence is valid.
pub fn verify_links<'a, I>(entries: I, anchor: ChainHash) -> VerificationReport
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    let mut expected_previous = anchor;
    let mut last_id = None;
    let mut checked = 0u64;

    for entry in entries {
        checked += 1;
        let mut reasons = Vec::new();

        if entry.previous_hash != expected_previous {
            reasons.push(format!(
                "entry {}: previous_hash {} does not match expected {}",
                entry.id(),
                entry.previous_hash,
                expected_previous
            ));
            if checked == 1 && expected_previous.is_genesis() {
                reasons.push(format!(
                    "entry {} is the earliest examined but does not link to genesis; \
                     if a retention sweep ran, verify from its checkpoint",
                    entry.id()
                ));
            }
        }

        if let Some(prev_id) = last_id {
            if entry.id() <= prev_id {
                reasons.push(format!(
                    "entry {} is out of order after entry {}",
                    entry.id(),
                    prev_id
                ));
            }
        }

        match recompute(entry) {
            Ok(recomputed) if recomputed != entry.hash_chain => reasons.push(format!(
                "entry {}: stored hash_chain {} does not match recomputed {}",
                entry.id(),
                entry.hash_chain,
                recomputed
            )),
            Ok(_) => {}
            Err(e) => reasons.push(format!("entry {}: cannot be canonicalized: {e}", entry.id())),
        }

        if !reasons.is_empty() {
            warn!(
                entry_id = %entry.id(),
                checked,
                reason = %reasons[0],
                "hash chain broken"
            );
            return VerificationReport {
                valid: false,
                first_break_id: Some(entry.id()),
                reasons,
                entries_checked: checked,
                anchor,
            };
        }

        expected_previous = entry.hash_chain;
        last_id = Some(entry.id());
    }

    VerificationReport::valid(checked, anchor)
}
