//! Changed-field detection between two snapshots.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use tessera_chain::canonical_json;
use tessera_contracts::error::LedgerResult;

/// Sorted names of top-level fields whose canonical JSON differs between
/// `previous` and `current`.
///
/// A field present on one side only counts as changed.  A missing or
/// non-object snapshot contributes no fields.  The result depends on nothing
/// but the two inputs.
pub fn changed_fields(previous: Option<&Value>, current: Option<&Value>) -> LedgerResult<Vec<String>> {
    let empty = Map::new();
    let before = previous.and_then(Value::as_object).unwrap_or(&empty);
    let after = current.and_then(Value::as_object).unwrap_or(&empty);

    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut changed = Vec::new();
    for name in names {
        let old = before.get(name).map(canonical_json).transpose()?;
        let new = after.get(name).map(canonical_json).transpose()?;
        if old != new {
            changed.push(name.clone());
        }
    }
    Ok(changed)
}
