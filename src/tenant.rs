use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::limits::*;
use crate::scheduler::{AllowOverlaps, OverlapPolicy, RejectOverlaps, Scheduler, SchedulerOptions};
use crate::store::WalStore;

/// Manages per-tenant schedulers. Each tenant gets its own store + WAL +
/// compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    schedulers: DashMap<String, Arc<Scheduler>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    options: SchedulerOptions,
    reject_overlaps: bool,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            schedulers: DashMap::new(),
            data_dir,
            compact_threshold,
            options: SchedulerOptions::default(),
            reject_overlaps: false,
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reject_overlaps(mut self, reject: bool) -> Self {
        self.reject_overlaps = reject;
        self
    }

    pub fn tenant_count(&self) -> usize {
        self.schedulers.len()
    }

    /// Get or lazily create the scheduler for the given tenant.
    ///
    /// Names are keyed by their sanitized form, so `ab`, `a.b` and `../ab`
    /// all resolve to the one scheduler that owns `ab.wal`.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Scheduler>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant)?;
        if let Some(scheduler) = self.schedulers.get(&safe_name) {
            return Ok(scheduler.value().clone());
        }
        if self.schedulers.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two first connections for the same tenant race here; the entry
        // lock makes only one of them open the WAL.
        let entry = self.schedulers.entry(safe_name.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let store = Arc::new(WalStore::open(&wal_path)?);
        info!(
            tenant = %safe_name,
            slots = store.slot_count(),
            bookings = store.booking_count(),
            "tenant opened"
        );

        let compactor_store = store.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_store, threshold).await;
        });

        let policy: Arc<dyn OverlapPolicy> = if self.reject_overlaps {
            Arc::new(RejectOverlaps)
        } else {
            Arc::new(AllowOverlaps)
        };
        let scheduler = Arc::new(
            Scheduler::new(store)
                .with_policy(policy)
                .with_options(self.options.clone()),
        );

        entry.or_insert(scheduler.clone());
        // len() visits every shard, so only after the entry guard is gone.
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.schedulers.len() as f64);
        Ok(scheduler)
    }
}

/// Strip everything but alphanumerics, `_` and `-` so the name is safe as a
/// file stem.
fn sanitize(tenant: &str) -> std::io::Result<String> {
    let safe_name: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty tenant name",
        ));
    }
    Ok(safe_name)
}
