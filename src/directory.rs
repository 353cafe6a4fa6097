//! Tenant directory with atomically swappable snapshots
//!
//! Lookups capture one immutable snapshot per request; a reload installs a
//! complete replacement map in a single pointer swap, so concurrent readers
//! either see the whole old snapshot or the whole new one.

use crate::config::{DataFormat, EncryptionMode, TenantConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered tenant, immutable for the lifetime of one snapshot
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub token: String,
    pub app_secret: String,
    pub encryption_key: String,
    pub data_format: DataFormat,
    pub encryption_mode: EncryptionMode,
    pub access_token_cache_key: Option<String>,
    pub ticket_cache_key: Option<String>,
}

impl From<TenantConfig> for Tenant {
    fn from(config: TenantConfig) -> Self {
        Self {
            id: config.id,
            token: config.token,
            app_secret: config.app_secret,
            encryption_key: config.encryption_key,
            data_format: config.data_format,
            encryption_mode: config.encryption_mode,
            access_token_cache_key: config.access_token_cache_key,
            ticket_cache_key: config.ticket_cache_key,
        }
    }
}

type Snapshot = Arc<HashMap<String, Arc<Tenant>>>;

/// Outcome of a snapshot replacement
#[derive(Debug)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub total: usize,
}

/// Read-only tenant lookup backed by a hot-swappable snapshot
pub struct TenantDirectory {
    snapshot: RwLock<Snapshot>,
}

impl TenantDirectory {
    pub fn new(tenants: Vec<TenantConfig>) -> Self {
        Self {
            snapshot: RwLock::new(build_snapshot(tenants)),
        }
    }

    /// Resolve a tenant by id. Absence is a normal outcome, never an error.
    pub fn resolve(&self, tenant_id: &str) -> Option<Arc<Tenant>> {
        self.snapshot.read().get(tenant_id).cloned()
    }

    pub fn exists(&self, tenant_id: &str) -> bool {
        self.snapshot.read().contains_key(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Install a new snapshot wholesale, returning what changed.
    /// The lock is held only for the diff and the pointer swap.
    pub fn replace(&self, tenants: Vec<TenantConfig>) -> ReloadSummary {
        let next = build_snapshot(tenants);
        let mut guard = self.snapshot.write();

        let added = next
            .keys()
            .filter(|id| !guard.contains_key(*id))
            .cloned()
            .collect();
        let removed = guard
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        let total = next.len();

        *guard = next;
        ReloadSummary {
            added,
            removed,
            total,
        }
    }
}

fn build_snapshot(tenants: Vec<TenantConfig>) -> Snapshot {
    Arc::new(
        tenants
            .into_iter()
            .map(|config| (config.id.clone(), Arc::new(Tenant::from(config))))
            .collect(),
    )
}
