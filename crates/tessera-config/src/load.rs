//! Loading and validating a `LedgerConfig` from TOML.

use std::path::Path;

use tracing::debug;

use tessera_contracts::error::{LedgerError, LedgerResult};

use crate::config::LedgerConfig;

impl LedgerConfig {
    /// Parse `s` as TOML and validate the result.
    ///
    /// Returns `LedgerError::Config` if the TOML is malformed, names an
    /// unknown field, or fails `validate`.
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse ledger TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it with `from_toml_str`.
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&contents)?;
        debug!(path = %path.display(), "ledger configuration loaded");
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> LedgerResult<()> {
        let fail = |reason: &str| {
            Err(LedgerError::Config {
                reason: reason.to_string(),
            })
        };

        if self.writer.append_budget_ms == 0 {
            return fail("writer.append_budget_ms must be greater than zero");
        }
        if self.writer.backoff_base_ms > self.writer.backoff_max_ms {
            return fail("writer.backoff_base_ms must not exceed writer.backoff_max_ms");
        }
        if self.redaction.mask.is_empty() {
            return fail("redaction.mask must not be empty");
        }
        if self.query.default_page_size == 0 || self.query.max_page_size == 0 {
            return fail("query page sizes must be greater than zero");
        }
        if self.query.default_page_size > self.query.max_page_size {
            return fail("query.default_page_size must not exceed query.max_page_size");
        }
        if self.retention.horizon_years == 0 {
            return fail("retention.horizon_years must be at least 1");
        }
        Ok(())
    }
}
