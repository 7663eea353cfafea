//! One function per operator subcommand.  Each returns the process exit code.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use tessera_config::LedgerConfig;
use tessera_contracts::{
    entry::Amount,
    error::{LedgerError, LedgerResult},
    event::AuditEvent,
    ids::{ActorId, ChainHash},
    operation::OperationType,
    query::{Caller, EntryFilter, PageRequest, Role},
};
use tessera_core::{LedgerWriter, QueryService};
use tessera_retention::{read_archive_dir, JsonlArchiveSink, RetentionArchiver};
use tessera_store::open_store;
use tessera_verify::{Anchor, IntegrityVerifier, VerifyRange};

/// Exit code for a chain that failed verification.
const EXIT_BROKEN: i32 = 2;

pub struct RecordArgs {
    pub operation: OperationType,
    pub actor: Option<ActorId>,
    pub session: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub previous: Option<String>,
    pub current: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub tax_year: Option<u16>,
    pub failed: Option<String>,
}

pub struct ListArgs {
    pub actor: Option<ActorId>,
    pub operation: Option<OperationType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub caller: ActorId,
    pub role: Role,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub fn record(config: &LedgerConfig, args: RecordArgs) -> LedgerResult<i32> {
    let writer = LedgerWriter::new(open_store(&config.store)?, config);

    let mut event = AuditEvent::new(args.operation);
    event.actor_id = args.actor;
    event.session_id = args.session;
    event.resource_type = args.resource_type;
    event.resource_id = args.resource_id;
    event.previous_snapshot = args.previous.as_deref().map(parse_snapshot).transpose()?;
    event.current_snapshot = args.current.as_deref().map(parse_snapshot).transpose()?;
    event.amount = args.amount_minor.map(Amount::from_minor);
    event.currency = args.currency;
    event.tax_year = args.tax_year;
    if let Some(message) = args.failed {
        event = event.failed(message);
    }

    let status = writer.append(event);
    print_json(&status)?;
    Ok(if status.is_committed() { 0 } else { 1 })
}

pub fn list(config: &LedgerConfig, args: ListArgs) -> LedgerResult<i32> {
    let query = QueryService::new(open_store(&config.store)?, &config.query);
    let filter = EntryFilter {
        actor_id: args.actor,
        operation_type: args.operation,
        from: args.from,
        to: args.to,
    };
    let page = match (args.page, args.page_size) {
        (None, None) => None,
        (page, size) => Some(PageRequest::new(
            page.unwrap_or(1),
            size.unwrap_or(config.query.default_page_size),
        )),
    };

    let result = query.list(&Caller::new(args.caller, args.role), &filter, page)?;
    print_json(&result)?;
    Ok(0)
}

pub fn verify(
    config: &LedgerConfig,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    anchor: &str,
) -> LedgerResult<i32> {
    let verifier = IntegrityVerifier::new(open_store(&config.store)?);
    let range = VerifyRange {
        start: from,
        end: to,
        anchor: parse_anchor(anchor)?,
    };

    let report = verifier.verify(&range)?;
    print_json(&report)?;
    Ok(if report.valid { 0 } else { EXIT_BROKEN })
}

pub fn sweep(
    config: &LedgerConfig,
    horizon_years: Option<u32>,
    before: Option<DateTime<Utc>>,
) -> LedgerResult<i32> {
    let sink = Arc::new(JsonlArchiveSink::from_config(&config.retention));
    let archiver = RetentionArchiver::new(open_store(&config.store)?, sink);

    let report = match before {
        Some(cutoff) => archiver.sweep_before(cutoff)?,
        None => archiver.sweep(horizon_years.unwrap_or(config.retention.horizon_years))?,
    };
    print_json(&report)?;
    Ok(0)
}

pub fn reconcile(config: &LedgerConfig) -> LedgerResult<i32> {
    let writer = LedgerWriter::new(open_store(&config.store)?, config);
    let report = writer.reconcile_spill()?;
    print_json(&report)?;
    Ok(if report.remaining == 0 { 0 } else { 1 })
}

pub fn history(config: &LedgerConfig, archive_dir: Option<PathBuf>) -> LedgerResult<i32> {
    let dir = archive_dir.unwrap_or_else(|| config.retention.archive_dir.clone());
    let segments = read_archive_dir(&dir)?;
    for segment in &segments {
        eprintln!(
            "archive {}: entries {}..={} ({} entries, {} bytes stored)",
            segment.path.display(),
            segment.metadata.first_id,
            segment.metadata.last_id,
            segment.metadata.entry_count,
            segment.metadata.stored_size
        );
    }

    let verifier = IntegrityVerifier::new(open_store(&config.store)?);
    let report = verifier.verify_history(segments.into_iter().flat_map(|s| s.entries))?;
    print_json(&report)?;
    Ok(if report.valid { 0 } else { EXIT_BROKEN })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_snapshot(text: &str) -> LedgerResult<Value> {
    serde_json::from_str(text).map_err(|e| LedgerError::Malformed {
        reason: format!("snapshot is not valid JSON: {e}"),
    })
}

fn parse_anchor(text: &str) -> LedgerResult<Anchor> {
    match text {
        "auto" => Ok(Anchor::Auto),
        "genesis" => Ok(Anchor::Genesis),
        hex => ChainHash::from_hex(hex).map(Anchor::Hash),
    }
}

fn print_json<T: Serialize>(value: &T) -> LedgerResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| LedgerError::Malformed {
        reason: format!("failed to render output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_keywords_and_hex() {
        assert_eq!(parse_anchor("auto").unwrap(), Anchor::Auto);
        assert_eq!(parse_anchor("genesis").unwrap(), Anchor::Genesis);
        assert_eq!(
            parse_anchor(&"00".repeat(32)).unwrap(),
            Anchor::Hash(ChainHash::GENESIS)
        );
        assert!(parse_anchor("latest").is_err());
    }

    #[test]
    fn test_snapshot_must_be_json() {
        assert_eq!(parse_snapshot(r#"{"amount":750}"#).unwrap()["amount"], 750);
        assert!(matches!(parse_snapshot("{amount"), Err(LedgerError::Malformed { .. })));
    }
}
