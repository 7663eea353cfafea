//! SQLite implementation of `LedgerStore`.
//!
//! Appends run in a `BEGIN IMMEDIATE` transaction: the tip read, the entry
//! build, and the insert all happen while this connection holds SQLite's
//! single write lock, so two processes sharing a database file cannot fork
//! the chain.  A writer that cannot get the lock within the busy timeout
//! gets `LedgerError::Contention` and retries from a fresh tip.
//!
//! The schema backs that up independently of the code path: `previous_hash`
//! is unique, entries cannot be updated, and checkpoints can be neither
//! updated nor deleted.
//!
//! File-backed stores read through a second connection in WAL mode, so
//! listing and verification never wait behind an append.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::{
    ffi, params, params_from_iter, types::Value as SqlValue, Connection, ErrorCode,
    OptionalExtension, Row, TransactionBehavior,
};
use serde_json::Value;
use tracing::{debug, info};

use tessera_chain::canonical::timestamp;
use tessera_contracts::{
    entry::{Amount, AuditEntry, ChainTip, Checkpoint, EntryBody, RequestContext},
    error::{LedgerError, LedgerResult},
    ids::{ActorId, ChainHash, EntryId},
    operation::OperationType,
    query::EntryFilter,
};
use tessera_core::traits::LedgerStore;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS audit_entries (
    id                INTEGER PRIMARY KEY,
    created_at        TEXT    NOT NULL,
    actor_id          TEXT    NOT NULL,
    session_id        TEXT,
    operation_type    TEXT    NOT NULL,
    resource_type     TEXT,
    resource_id       TEXT,
    ip_address        TEXT    NOT NULL,
    user_agent        TEXT    NOT NULL,
    http_method       TEXT    NOT NULL,
    endpoint          TEXT    NOT NULL,
    previous_snapshot TEXT,
    current_snapshot  TEXT,
    changed_fields    TEXT    NOT NULL,
    amount_minor      INTEGER,
    currency          TEXT,
    tax_year          INTEGER,
    success           INTEGER NOT NULL,
    error_message     TEXT,
    previous_hash     TEXT    NOT NULL,
    hash_chain        TEXT    NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_audit_entries_previous_hash ON audit_entries(previous_hash);
CREATE INDEX IF NOT EXISTS ix_audit_entries_created ON audit_entries(created_at, id);
CREATE INDEX IF NOT EXISTS ix_audit_entries_actor ON audit_entries(actor_id, created_at);
CREATE INDEX IF NOT EXISTS ix_audit_entries_operation ON audit_entries(operation_type, created_at);

CREATE TABLE IF NOT EXISTS audit_checkpoints (
    seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
    checkpoint_hash     TEXT    NOT NULL,
    superseded_entry_id INTEGER NOT NULL,
    created_at          TEXT    NOT NULL
);

CREATE TRIGGER IF NOT EXISTS audit_entries_immutable
BEFORE UPDATE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_checkpoints_no_update
BEFORE UPDATE ON audit_checkpoints
BEGIN
    SELECT RAISE(ABORT, 'checkpoints are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_checkpoints_no_delete
BEFORE DELETE ON audit_checkpoints
BEGIN
    SELECT RAISE(ABORT, 'checkpoints are immutable');
END;
"#;

const ENTRY_COLUMNS: &str = "id, created_at, actor_id, session_id, operation_type, resource_type, \
     resource_id, ip_address, user_agent, http_method, endpoint, previous_snapshot, \
     current_snapshot, changed_fields, amount_minor, currency, tax_year, success, \
     error_message, previous_hash, hash_chain";

// ── Error mapping ─────────────────────────────────────────────────────────────

/// Busy and locked databases, and unique-key violations from a concurrent
/// writer, are contention.  Everything else is a persistence failure.
fn map_sqlite(action: &str, e: rusqlite::Error) -> LedgerError {
    let contended = match &e {
        rusqlite::Error::SqliteFailure(err, _) => {
            matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
                || err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    };
    if contended {
        LedgerError::Contention {
            reason: format!("{action}: {e}"),
        }
    } else {
        LedgerError::Persistence {
            reason: format!("{action}: {e}"),
        }
    }
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> LedgerError {
    LedgerError::Persistence {
        reason: format!("stored column '{column}' is unreadable: {detail}"),
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

/// One `audit_entries` row exactly as stored.
struct StoredRow {
    id: i64,
    created_at: String,
    actor_id: String,
    session_id: Option<String>,
    operation_type: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    ip_address: String,
    user_agent: String,
    http_method: String,
    endpoint: String,
    previous_snapshot: Option<String>,
    current_snapshot: Option<String>,
    changed_fields: String,
    amount_minor: Option<i64>,
    currency: Option<String>,
    tax_year: Option<i64>,
    success: bool,
    error_message: Option<String>,
    previous_hash: String,
    hash_chain: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            actor_id: row.get(2)?,
            session_id: row.get(3)?,
            operation_type: row.get(4)?,
            resource_type: row.get(5)?,
            resource_id: row.get(6)?,
            ip_address: row.get(7)?,
            user_agent: row.get(8)?,
            http_method: row.get(9)?,
            endpoint: row.get(10)?,
            previous_snapshot: row.get(11)?,
            current_snapshot: row.get(12)?,
            changed_fields: row.get(13)?,
            amount_minor: row.get(14)?,
            currency: row.get(15)?,
            tax_year: row.get(16)?,
            success: row.get(17)?,
            error_message: row.get(18)?,
            previous_hash: row.get(19)?,
            hash_chain: row.get(20)?,
        })
    }

    fn into_entry(self) -> LedgerResult<AuditEntry> {
        let snapshot = |column: &str, raw: Option<String>| -> LedgerResult<Option<Value>> {
            raw.map(|text| serde_json::from_str(&text).map_err(|e| corrupt(column, e)))
                .transpose()
        };

        let body = EntryBody {
            id: EntryId(u64::try_from(self.id).map_err(|e| corrupt("id", e))?),
            created_at: parse_timestamp("created_at", &self.created_at)?,
            actor_id: ActorId(self.actor_id),
            session_id: self.session_id,
            operation_type: OperationType::from_str(&self.operation_type)
                .map_err(|e| corrupt("operation_type", e))?,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            context: RequestContext {
                ip_address: self.ip_address,
                user_agent: self.user_agent,
                http_method: self.http_method,
                endpoint: self.endpoint,
            },
            previous_snapshot: snapshot("previous_snapshot", self.previous_snapshot)?,
            current_snapshot: snapshot("current_snapshot", self.current_snapshot)?,
            changed_fields: serde_json::from_str(&self.changed_fields)
                .map_err(|e| corrupt("changed_fields", e))?,
            amount: self.amount_minor.map(Amount::from_minor),
            currency: self.currency,
            tax_year: self
                .tax_year
                .map(u16::try_from)
                .transpose()
                .map_err(|e| corrupt("tax_year", e))?,
            success: self.success,
            error_message: self.error_message,
        };

        Ok(AuditEntry {
            body,
            previous_hash: ChainHash::from_hex(&self.previous_hash).map_err(|e| corrupt("previous_hash", e))?,
            hash_chain: ChainHash::from_hex(&self.hash_chain).map_err(|e| corrupt("hash_chain", e))?,
        })
    }
}

fn parse_timestamp(column: &str, raw: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_checkpoint((hash, id, created_at): (String, i64, String)) -> LedgerResult<Checkpoint> {
    Ok(Checkpoint {
        checkpoint_hash: ChainHash::from_hex(&hash).map_err(|e| corrupt("checkpoint_hash", e))?,
        superseded_entry_id: EntryId(u64::try_from(id).map_err(|e| corrupt("superseded_entry_id", e))?),
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn json_text(column: &str, value: &impl serde::Serialize) -> LedgerResult<String> {
    serde_json::to_string(value).map_err(|e| LedgerError::Persistence {
        reason: format!("failed to encode {column}: {e}"),
    })
}

fn as_sql_int(column: &str, value: u64) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::Persistence {
        reason: format!("{column} {value} exceeds the SQLite integer range"),
    })
}

/// Render a filter bound so that string comparison against stored
/// microsecond timestamps agrees with comparing the full-precision value.
fn bound(at: DateTime<Utc>) -> String {
    let floor = at.trunc_subsecs(6);
    if floor < at {
        timestamp(&(floor + chrono::Duration::microseconds(1)))
    } else {
        timestamp(&floor)
    }
}

/// `WHERE` clause and parameters for `filter`.
fn where_clause(filter: &EntryFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(actor) = &filter.actor_id {
        clauses.push("actor_id = ?");
        values.push(SqlValue::Text(actor.as_str().to_string()));
    }
    if let Some(op) = filter.operation_type {
        clauses.push("operation_type = ?");
        values.push(SqlValue::Text(op.as_str().to_string()));
    }
    if let Some(from) = filter.from {
        clauses.push("created_at >= ?");
        values.push(SqlValue::Text(bound(from)));
    }
    if let Some(to) = filter.to {
        clauses.push("created_at < ?");
        values.push(SqlValue::Text(bound(to)));
    }
    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

pub struct SqliteLedgerStore {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteLedgerStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// `busy_timeout` bounds how long an append waits for another process's
    /// write lock before reporting contention.
    pub fn open(path: &Path, busy_timeout: Duration) -> LedgerResult<Self> {
        let writer = Connection::open(path).map_err(|e| map_sqlite("open ledger database", e))?;
        writer
            .busy_timeout(busy_timeout)
            .map_err(|e| map_sqlite("set busy timeout", e))?;
        writer
            .execute_batch("PRAGMA journal_mode=WAL;\nPRAGMA synchronous=FULL;")
            .map_err(|e| map_sqlite("configure journal", e))?;
        writer
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| map_sqlite("create schema", e))?;

        let reader = Connection::open(path).map_err(|e| map_sqlite("open reader connection", e))?;
        reader
            .busy_timeout(busy_timeout)
            .map_err(|e| map_sqlite("set busy timeout", e))?;
        reader
            .execute_batch("PRAGMA query_only=ON;")
            .map_err(|e| map_sqlite("configure reader", e))?;

        info!(path = %path.display(), "sqlite ledger store opened");
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private in-memory database.  Reads share the writer connection.
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| map_sqlite("open in-memory database", e))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| map_sqlite("create schema", e))?;
        let shared = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: shared.clone(),
            reader: shared,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run raw SQL on the writer connection.
    ///
    /// Exists so tests can confirm the schema rejects tampering; the ledger
    /// never calls it.
    pub fn execute_raw(&self, sql: &str) -> LedgerResult<usize> {
        self.writer
            .lock()
            .execute(sql, [])
            .map_err(|e| map_sqlite("execute raw statement", e))
    }

    fn insert(tx: &rusqlite::Transaction<'_>, entry: &AuditEntry) -> LedgerResult<()> {
        let body = &entry.body;
        let previous_snapshot = body
            .previous_snapshot
            .as_ref()
            .map(|v| json_text("previous_snapshot", v))
            .transpose()?;
        let current_snapshot = body
            .current_snapshot
            .as_ref()
            .map(|v| json_text("current_snapshot", v))
            .transpose()?;
        let changed_fields = json_text("changed_fields", &body.changed_fields)?;

        tx.execute(
            &format!(
                "INSERT INTO audit_entries ({ENTRY_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                as_sql_int("id", body.id.0)?,
                timestamp(&body.created_at),
                body.actor_id.as_str(),
                body.session_id,
                body.operation_type.as_str(),
                body.resource_type,
                body.resource_id,
                body.context.ip_address,
                body.context.user_agent,
                body.context.http_method,
                body.context.endpoint,
                previous_snapshot,
                current_snapshot,
                changed_fields,
                body.amount.map(|a| a.minor_units()),
                body.currency,
                body.tax_year,
                body.success,
                body.error_message,
                entry.previous_hash.to_hex(),
                entry.hash_chain.to_hex(),
            ],
        )
        .map_err(|e| map_sqlite("insert audit entry", e))?;
        Ok(())
    }

    fn read_tip(conn: &Connection) -> LedgerResult<ChainTip> {
        let latest = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM audit_entries ORDER BY id DESC LIMIT 1"),
                [],
                StoredRow::from_row,
            )
            .optional()
            .map_err(|e| map_sqlite("read chain tip", e))?
            .map(StoredRow::into_entry)
            .transpose()?;
        let checkpoint = Self::read_latest_checkpoint(conn)?;
        Ok(ChainTip::resolve(latest.as_ref(), checkpoint.as_ref()))
    }

    fn read_latest_checkpoint(conn: &Connection) -> LedgerResult<Option<Checkpoint>> {
        conn.query_row(
            "SELECT checkpoint_hash, superseded_entry_id, created_at \
             FROM audit_checkpoints ORDER BY seq DESC LIMIT 1",
            [],
            checkpoint_from_row,
        )
        .optional()
        .map_err(|e| map_sqlite("read latest checkpoint", e))?
        .map(into_checkpoint)
        .transpose()
    }

    fn query_entries(conn: &Connection, sql: &str, values: Vec<SqlValue>) -> LedgerResult<Vec<AuditEntry>> {
        let mut stmt = conn.prepare(sql).map_err(|e| map_sqlite("prepare entry query", e))?;
        let rows = stmt
            .query_map(params_from_iter(values), StoredRow::from_row)
            .map_err(|e| map_sqlite("query entries", e))?;
        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| map_sqlite("read entry row", e))?;
            entries.push(row.into_entry()?);
        }
        Ok(entries)
    }
}

// ── LedgerStore impl ──────────────────────────────────────────────────────────

impl LedgerStore for SqliteLedgerStore {
    fn append_with(
        &self,
        build: &mut dyn FnMut(&ChainTip) -> LedgerResult<AuditEntry>,
    ) -> LedgerResult<AuditEntry> {
        let mut conn = self.writer.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| map_sqlite("begin append", e))?;

        let tip = Self::read_tip(&tx)?;
        let entry = build(&tip)?;
        Self::insert(&tx, &entry)?;
        tx.commit().map_err(|e| map_sqlite("commit append", e))?;

        debug!(id = %entry.id(), hash = %entry.hash_chain, "entry appended to sqlite store");
        Ok(entry)
    }

    fn tip(&self) -> LedgerResult<ChainTip> {
        Self::read_tip(&self.reader.lock())
    }

    fn list(&self, filter: &EntryFilter, offset: u64, limit: Option<u64>) -> LedgerResult<Vec<AuditEntry>> {
        let (clause, mut values) = where_clause(filter);
        values.push(SqlValue::Integer(match limit {
            Some(n) => as_sql_int("limit", n)?,
            None => -1,
        }));
        values.push(SqlValue::Integer(as_sql_int("offset", offset)?));
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_entries{clause} ORDER BY created_at, id LIMIT ? OFFSET ?"
        );
        Self::query_entries(&self.reader.lock(), &sql, values)
    }

    fn count(&self, filter: &EntryFilter) -> LedgerResult<u64> {
        let (clause, values) = where_clause(filter);
        let conn = self.reader.lock();
        let n: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM audit_entries{clause}"),
                params_from_iter(values),
                |row| row.get(0),
            )
            .map_err(|e| map_sqlite("count entries", e))?;
        Ok(n.max(0) as u64)
    }

    fn latest_before(&self, at: DateTime<Utc>) -> LedgerResult<Option<AuditEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM audit_entries WHERE created_at < ? \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let mut entries = Self::query_entries(&self.reader.lock(), &sql, vec![SqlValue::Text(bound(at))])?;
        Ok(entries.pop())
    }

    fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
        Self::read_latest_checkpoint(&self.reader.lock())
    }

    fn checkpoints(&self) -> LedgerResult<Vec<Checkpoint>> {
        let conn = self.reader.lock();
        let mut stmt = conn
            .prepare(
                "SELECT checkpoint_hash, superseded_entry_id, created_at \
                 FROM audit_checkpoints ORDER BY seq",
            )
            .map_err(|e| map_sqlite("prepare checkpoint query", e))?;
        let rows = stmt
            .query_map([], checkpoint_from_row)
            .map_err(|e| map_sqlite("query checkpoints", e))?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(into_checkpoint(row.map_err(|e| map_sqlite("read checkpoint row", e))?)?);
        }
        Ok(checkpoints)
    }

    fn purge_through(&self, checkpoint: &Checkpoint) -> LedgerResult<u64> {
        let through = as_sql_int("superseded_entry_id", checkpoint.superseded_entry_id.0)?;
        let mut conn = self.writer.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| map_sqlite("begin purge", e))?;

        tx.execute(
            "INSERT INTO audit_checkpoints (checkpoint_hash, superseded_entry_id, created_at) \
             VALUES (?1, ?2, ?3)",
            params![
                checkpoint.checkpoint_hash.to_hex(),
                through,
                timestamp(&checkpoint.created_at),
            ],
        )
        .map_err(|e| map_sqlite("insert checkpoint", e))?;
        let purged = tx
            .execute("DELETE FROM audit_entries WHERE id <= ?1", params![through])
            .map_err(|e| map_sqlite("delete purged entries", e))?;
        tx.commit().map_err(|e| map_sqlite("commit purge", e))?;

        info!(through = through, purged, "sqlite store purged");
        Ok(purged as u64)
    }
}
