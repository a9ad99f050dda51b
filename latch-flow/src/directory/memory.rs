use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use latch_core::{
    FlowError, FlowResult, Identity, IdentityId, SubscriptionStatus, SubscriptionTier, Tenant,
    TenantId,
};

use super::{ContactMatch, TenantDirectory};

#[derive(Debug, Clone)]
struct Association {
    tenant_id: TenantId,
    is_admin: bool,
}

/// In-memory directory for testing and development.
///
/// Carries fault-injection switches so conformance tests can exercise the
/// flow's failure paths: denied contact lookups, failing tenant writes,
/// failing subscription writes, and artificial latency.
pub struct MemoryDirectory {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    associations: RwLock<HashMap<IdentityId, Association>>,
    /// Contact email -> tenant, maintained from attached identities
    contacts: RwLock<HashMap<String, TenantId>>,

    deny_contact_lookup: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscription_writes: AtomicBool,
    latency: RwLock<Option<Duration>>,

    create_calls: AtomicUsize,
    attach_calls: AtomicUsize,
    subscription_writes: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            associations: RwLock::new(HashMap::new()),
            contacts: RwLock::new(HashMap::new()),
            deny_contact_lookup: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_subscription_writes: AtomicBool::new(false),
            latency: RwLock::new(None),
            create_calls: AtomicUsize::new(0),
            attach_calls: AtomicUsize::new(0),
            subscription_writes: AtomicUsize::new(0),
        }
    }

    /// Pretend the reverse contact lookup is not permitted (e.g. running
    /// with insufficient privilege)
    pub fn set_deny_contact_lookup(&self, deny: bool) {
        self.deny_contact_lookup.store(deny, Ordering::SeqCst);
    }

    /// Make tenant creation and attachment writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subscription updates fail
    pub fn set_fail_subscription_writes(&self, fail: bool) {
        self.fail_subscription_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every directory call by the given duration
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Number of create_tenant calls that reached the store
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of attach_identity calls that reached the store
    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    /// Number of subscription updates that reached the store
    pub fn subscription_write_calls(&self) -> usize {
        self.subscription_writes.load(Ordering::SeqCst)
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.read().len()
    }

    /// Current association of an identity: (tenant, is_admin)
    pub fn association_of(&self, identity: &IdentityId) -> Option<(TenantId, bool)> {
        self.associations
            .read()
            .get(identity)
            .map(|a| (a.tenant_id.clone(), a.is_admin))
    }

    /// Seed a tenant record (test fixture)
    pub fn insert_tenant(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.id.clone(), tenant);
    }

    /// Seed an association plus its contact entry (test fixture)
    pub fn insert_association(
        &self,
        identity: &IdentityId,
        email: Option<&str>,
        tenant: &TenantId,
        is_admin: bool,
    ) {
        self.associations.write().insert(
            identity.clone(),
            Association {
                tenant_id: tenant.clone(),
                is_admin,
            },
        );
        if let Some(email) = email {
            self.contacts
                .write()
                .insert(email.to_ascii_lowercase(), tenant.clone());
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantDirectory for MemoryDirectory {
    async fn find_associated_tenant(
        &self,
        identity: &IdentityId,
    ) -> FlowResult<Option<TenantId>> {
        self.simulate_latency().await;
        Ok(self
            .associations
            .read()
            .get(identity)
            .map(|a| a.tenant_id.clone()))
    }

    async fn find_tenant_by_contact(&self, email: &str) -> FlowResult<Option<ContactMatch>> {
        self.simulate_latency().await;
        if self.deny_contact_lookup.load(Ordering::SeqCst) {
            return Err(FlowError::lookup_unavailable(
                "contact lookup not permitted",
            ));
        }

        let contacts = self.contacts.read();
        let Some(tenant_id) = contacts.get(&email.to_ascii_lowercase()) else {
            return Ok(None);
        };

        let tenants = self.tenants.read();
        Ok(tenants.get(tenant_id).map(|t| ContactMatch {
            tenant_id: t.id.clone(),
            tenant_name: t.name.clone(),
        }))
    }

    async fn create_tenant(&self, name: &str) -> FlowResult<Tenant> {
        self.simulate_latency().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FlowError::write_failed("tenant insert rejected"));
        }

        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let tenant = Tenant::new(name);
        self.tenants
            .write()
            .insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn attach_identity(
        &self,
        identity: &Identity,
        tenant: &TenantId,
        as_admin: bool,
    ) -> FlowResult<()> {
        self.simulate_latency().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FlowError::write_failed("association insert rejected"));
        }

        let mut associations = self.associations.write();
        if let Some(existing) = associations.get(&identity.id) {
            if existing.tenant_id == *tenant {
                // Re-attach to the same tenant is a no-op
                return Ok(());
            }
            return Err(FlowError::conflict(format!(
                "identity {} already attached to tenant {}",
                identity.id, existing.tenant_id
            )));
        }

        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        associations.insert(
            identity.id.clone(),
            Association {
                tenant_id: tenant.clone(),
                is_admin: as_admin,
            },
        );

        if let Some(email) = &identity.email {
            self.contacts
                .write()
                .entry(email.to_ascii_lowercase())
                .or_insert_with(|| tenant.clone());
        }

        Ok(())
    }

    async fn get_tenant(&self, tenant: &TenantId) -> FlowResult<Option<Tenant>> {
        self.simulate_latency().await;
        Ok(self.tenants.read().get(tenant).cloned())
    }

    async fn update_subscription(
        &self,
        tenant: &TenantId,
        status: SubscriptionStatus,
        tier: SubscriptionTier,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> FlowResult<()> {
        self.simulate_latency().await;
        if self.fail_subscription_writes.load(Ordering::SeqCst) {
            return Err(FlowError::write_failed("subscription update rejected"));
        }

        let mut tenants = self.tenants.write();
        let Some(record) = tenants.get_mut(tenant) else {
            return Err(FlowError::write_failed(format!(
                "tenant {tenant} not found"
            )));
        };

        self.subscription_writes.fetch_add(1, Ordering::SeqCst);
        record.subscription_status = status;
        record.subscription_tier = tier;
        record.trial_ends_at = trial_ends_at;
        Ok(())
    }
}
