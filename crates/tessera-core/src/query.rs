//! Administrative listing with role-based snapshot masking.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use tessera_config::QueryConfig;
use tessera_contracts::{
    entry::AuditEntry,
    error::LedgerResult,
    operation::OperationType,
    query::{Caller, EntryFilter, EntryView, Page, PageRequest},
};

use crate::traits::LedgerStore;

/// Read-only access to the live store for reporting callers.
pub struct QueryService {
    store: Arc<dyn LedgerStore>,
    config: QueryConfig,
    sensitive: HashSet<OperationType>,
}

impl QueryService {
    pub fn new(store: Arc<dyn LedgerStore>, config: &QueryConfig) -> Self {
        let sensitive = OperationType::ALL
            .iter()
            .copied()
            .filter(OperationType::is_security_sensitive)
            .chain(config.extra_sensitive_operations.iter().copied())
            .collect();
        Self {
            store,
            config: config.clone(),
            sensitive,
        }
    }

    /// True when snapshots of `operation` are withheld from non-elevated
    /// callers.
    pub fn is_sensitive(&self, operation: OperationType) -> bool {
        self.sensitive.contains(&operation)
    }

    /// List entries matching `filter` in total order.
    ///
    /// `page` defaults to the first page of `default_page_size` rows; page
    /// sizes are clamped to `1..=max_page_size` and page numbers start at 1.
    pub fn list(&self, caller: &Caller, filter: &EntryFilter, page: Option<PageRequest>) -> LedgerResult<Page<EntryView>> {
        filter.validate()?;
        let request = self.normalize(page);

        let total = self.store.count(filter)?;
        let entries = self
            .store
            .list(filter, request.offset(), Some(u64::from(request.page_size)))?;

        let elevated = caller.role.is_elevated();
        let items: Vec<EntryView> = entries.into_iter().map(|e| self.view(e, elevated)).collect();

        debug!(
            caller = %caller.actor_id,
            page = request.page,
            returned = items.len(),
            total,
            "ledger entries listed"
        );

        Ok(Page {
            items,
            page: request.page,
            page_size: request.page_size,
            total,
        })
    }

    fn normalize(&self, page: Option<PageRequest>) -> PageRequest {
        let request = page.unwrap_or(PageRequest::new(1, self.config.default_page_size));
        PageRequest {
            page: request.page.max(1),
            page_size: request.page_size.clamp(1, self.config.max_page_size),
        }
    }

    fn view(&self, entry: AuditEntry, elevated: bool) -> EntryView {
        let mut body = entry.body;
        let withhold = !elevated && self.is_sensitive(body.operation_type);
        if withhold {
            body.previous_snapshot = None;
            body.current_snapshot = None;
        }
        EntryView {
            body,
            snapshots_withheld: withhold,
            hash_chain: entry.hash_chain,
        }
    }
}
