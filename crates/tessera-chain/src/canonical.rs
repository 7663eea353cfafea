//! Canonical byte encoding of an entry body.
//!
//! The encoding is independent of struct field order, JSON key order, and
//! serializer settings, so any process can recompute an entry's hash from its
//! stored fields alone.
//!
//! Layout (bytes, in order):
//!   1. the format tag `tessera.entry.v1`, length-prefixed
//!   2. for every schema field, in the fixed order of `FIELDS`:
//!      - the field name, length-prefixed
//!      - `0x00` when the optional value is absent, or
//!      - `0x01` followed by the length-prefixed value bytes
//!
//! Length prefixes are 4-byte big-endian.  Snapshots are compact JSON with
//! object keys sorted at every depth; `Some(null)` encodes as present with the
//! bytes `null` and never collides with an absent snapshot.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde_json::Value;

use tessera_contracts::{
    entry::EntryBody,
    error::{LedgerError, LedgerResult},
};

/// Format tag written before any field.
pub const FORMAT_TAG: &[u8] = b"tessera.entry.v1";

/// Schema field order.  Appending a field requires a new format tag.
pub const FIELDS: [&str; 19] = [
    "id",
    "created_at",
    "actor_id",
    "session_id",
    "operation_type",
    "resource_type",
    "resource_id",
    "context.ip_address",
    "context.user_agent",
    "context.http_method",
    "context.endpoint",
    "previous_snapshot",
    "current_snapshot",
    "changed_fields",
    "amount",
    "currency",
    "tax_year",
    "success",
    "error_message",
];

const ABSENT: u8 = 0x00;
const PRESENT: u8 = 0x01;

/// Serialize `body` into its canonical byte form.
///
/// # Errors
///
/// Returns `LedgerError::Malformed` when the body violates a structural rule:
/// a snapshot that is neither an object nor `null`, an amount without a
/// currency (or the reverse), a currency that is not three uppercase ASCII
/// letters, a resource id without a resource type, an error message on a
/// successful operation, or a timestamp finer than one microsecond.
pub fn canonicalize(body: &EntryBody) -> LedgerResult<Vec<u8>> {
    validate(body)?;

    let mut w = CanonicalWriter::new()?;
    let ctx = &body.context;

    w.field(FIELDS[0], Some(body.id.0.to_string().as_bytes()))?;
    w.field(FIELDS[1], Some(timestamp(&body.created_at).as_bytes()))?;
    w.field(FIELDS[2], Some(body.actor_id.as_str().as_bytes()))?;
    w.field(FIELDS[3], body.session_id.as_deref().map(str::as_bytes))?;
    w.field(FIELDS[4], Some(body.operation_type.as_str().as_bytes()))?;
    w.field(FIELDS[5], body.resource_type.as_deref().map(str::as_bytes))?;
    w.field(FIELDS[6], body.resource_id.as_deref().map(str::as_bytes))?;
    w.field(FIELDS[7], Some(ctx.ip_address.as_bytes()))?;
    w.field(FIELDS[8], Some(ctx.user_agent.as_bytes()))?;
    w.field(FIELDS[9], Some(ctx.http_method.as_bytes()))?;
    w.field(FIELDS[10], Some(ctx.endpoint.as_bytes()))?;

    let previous = body.previous_snapshot.as_ref().map(canonical_json).transpose()?;
    w.field(FIELDS[11], previous.as_deref())?;
    let current = body.current_snapshot.as_ref().map(canonical_json).transpose()?;
    w.field(FIELDS[12], current.as_deref())?;

    let changed = canonical_json(&Value::from(body.changed_fields.clone()))?;
    w.field(FIELDS[13], Some(changed.as_slice()))?;

    let amount = body.amount.map(|a| a.to_decimal_string());
    w.field(FIELDS[14], amount.as_deref().map(str::as_bytes))?;
    w.field(FIELDS[15], body.currency.as_deref().map(str::as_bytes))?;
    let tax_year = body.tax_year.map(|y| y.to_string());
    w.field(FIELDS[16], tax_year.as_deref().map(str::as_bytes))?;
    w.field(FIELDS[17], Some(if body.success { b"true" as &[u8] } else { b"false" }))?;
    w.field(FIELDS[18], body.error_message.as_deref().map(str::as_bytes))?;

    Ok(w.finish())
}

/// Compact JSON with object keys sorted recursively.
///
/// Used both for snapshot hashing and for deciding whether a snapshot field
/// changed, so the two can never disagree about equality.
pub fn canonical_json(value: &Value) -> LedgerResult<Vec<u8>> {
    let mut out = Vec::new();
    write_json(value, &mut out)?;
    Ok(out)
}

/// RFC 3339 UTC timestamp with exactly six fractional digits.
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn write_json(value: &Value, out: &mut Vec<u8>) -> LedgerResult<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out)?;
                out.push(b':');
                write_json(&map[key], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json(item, out)?;
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out)?,
    }
    Ok(())
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) -> LedgerResult<()> {
    serde_json::to_writer(out, value).map_err(|e| LedgerError::Malformed {
        reason: format!("snapshot value cannot be serialized: {e}"),
    })
}

fn validate(body: &EntryBody) -> LedgerResult<()> {
    let malformed = |reason: String| Err(LedgerError::Malformed { reason });

    for (name, snapshot) in [
        ("previous_snapshot", &body.previous_snapshot),
        ("current_snapshot", &body.current_snapshot),
    ] {
        if let Some(v) = snapshot {
            if !(v.is_object() || v.is_null()) {
                return malformed(format!("{name} must be a JSON object or null"));
            }
        }
    }

    match (&body.amount, &body.currency) {
        (Some(_), None) => return malformed("amount recorded without a currency".to_string()),
        (None, Some(c)) => return malformed(format!("currency '{c}' recorded without an amount")),
        (_, Some(c)) if !(c.len() == 3 && c.bytes().all(|b| b.is_ascii_uppercase())) => {
            return malformed(format!("currency '{c}' is not a three-letter ISO 4217 code"));
        }
        _ => {}
    }

    if body.resource_id.is_some() && body.resource_type.is_none() {
        return malformed("resource_id recorded without a resource_type".to_string());
    }

    if body.success && body.error_message.is_some() {
        return malformed("error_message recorded on a successful operation".to_string());
    }

    if body.created_at.nanosecond() % 1_000 != 0 {
        return malformed("created_at carries sub-microsecond precision".to_string());
    }

    Ok(())
}

/// Accumulates length-prefixed fields into the canonical buffer.
struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    fn new() -> LedgerResult<Self> {
        let mut w = Self { buf: Vec::with_capacity(512) };
        w.bytes(FORMAT_TAG)?;
        Ok(w)
    }

    fn field(&mut self, name: &str, value: Option<&[u8]>) -> LedgerResult<()> {
        self.bytes(name.as_bytes())?;
        match value {
            None => self.buf.push(ABSENT),
            Some(v) => {
                self.buf.push(PRESENT);
                self.bytes(v)?;
            }
        }
        Ok(())
    }

    fn bytes(&mut self, data: &[u8]) -> LedgerResult<()> {
        let len = u32::try_from(data.len()).map_err(|_| LedgerError::Malformed {
            reason: format!("field of {} bytes exceeds the 4 GiB limit", data.len()),
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}
