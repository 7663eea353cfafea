//! Snapshot redaction.
//!
//! Field names are compared after lowercasing and dropping every
//! non-alphanumeric character, so `taxFileNumber`, `tax_file_number`, and
//! `Tax-File-Number` all match the same denylist entry.  Matching applies at
//! every depth of objects and arrays.

use std::collections::HashSet;

use serde_json::Value;

use tessera_config::RedactionConfig;

/// Field names whose values never reach the ledger.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "password",
    "password_hash",
    "passwd",
    "current_password",
    "new_password",
    "secret",
    "client_secret",
    "api_key",
    "token",
    "access_token",
    "refresh_token",
    "session_token",
    "reset_token",
    "tfn",
    "tax_file_number",
    "pin",
    "otp",
    "mfa_code",
    "totp_secret",
    "private_key",
    "card_number",
    "cvv",
];

/// Substrings that mark a field as sensitive wherever they appear in its name.
const SENSITIVE_MARKERS: &[&str] = &["password", "secret", "apikey", "privatekey", "taxfilenumber"];

/// Masks denylisted fields in JSON snapshots.
#[derive(Debug, Clone)]
pub struct Redactor {
    denylist: HashSet<String>,
    mask: String,
}

impl Redactor {
    /// Build from the built-in denylist plus `config.extra_fields`.
    pub fn new(config: &RedactionConfig) -> Self {
        let denylist = DEFAULT_DENYLIST
            .iter()
            .copied()
            .chain(config.extra_fields.iter().map(String::as_str))
            .map(normalize)
            .collect();
        Self {
            denylist,
            mask: config.mask.clone(),
        }
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        let name = normalize(field);
        self.denylist.contains(&name) || SENSITIVE_MARKERS.iter().any(|m| name.contains(m))
    }

    /// Replace every sensitive field's value in place.
    ///
    /// Returns how many values were masked.
    pub fn redact(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => {
                let mut masked = 0;
                for (key, child) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *child = Value::String(self.mask.clone());
                        masked += 1;
                    } else {
                        masked += self.redact(child);
                    }
                }
                masked
            }
            Value::Array(items) => items.iter_mut().map(|item| self.redact(item)).sum(),
            _ => 0,
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(&RedactionConfig::default())
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn masks_denylisted_fields_at_any_depth() {
        let redactor = Redactor::default();
        let mut snapshot = json!({
            "email": "a@example.com",
            "password": "hunter2",
            "profile": { "taxFileNumber": "123 456 782", "name": "A" },
            "devices": [{ "refresh_token": "rt-1" }, { "label": "phone" }],
        });

        let masked = redactor.redact(&mut snapshot);

        assert_eq!(masked, 3);
        assert_eq!(snapshot["password"], "[REDACTED]");
        assert_eq!(snapshot["profile"]["taxFileNumber"], "[REDACTED]");
        assert_eq!(snapshot["devices"][0]["refresh_token"], "[REDACTED]");
        assert_eq!(snapshot["profile"]["name"], "A");
        assert_eq!(snapshot["email"], "a@example.com");
        assert!(!snapshot.to_string().contains("hunter2"));
    }

    #[test]
    fn marker_substrings_match_unlisted_names() {
        let redactor = Redactor::default();
        assert!(redactor.is_sensitive("old_password_hash"));
        assert!(redactor.is_sensitive("WebhookSecret"));
        assert!(!redactor.is_sensitive("amount"));
        assert!(!redactor.is_sensitive("token_count_limit"));
    }

    #[test]
    fn extra_fields_and_mask_come_from_config() {
        let redactor = Redactor::new(&RedactionConfig {
            extra_fields: vec!["bsb".to_string()],
            mask: "***".to_string(),
        });
        let mut snapshot = json!({ "BSB": "062-000", "amount": 10 });
        redactor.redact(&mut snapshot);
        assert_eq!(snapshot["BSB"], "***");
        assert_eq!(snapshot["amount"], 10);
    }

    #[test]
    fn redaction_is_idempotent() {
        let redactor = Redactor::default();
        let mut once = json!({ "pin": "1234", "nested": { "cvv": "999" } });
        redactor.redact(&mut once);
        let mut twice = once.clone();
        redactor.redact(&mut twice);
        assert_eq!(once, twice);
    }
}
