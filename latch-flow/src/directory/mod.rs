pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use latch_core::{
    FlowResult, Identity, IdentityId, SubscriptionStatus, SubscriptionTier, Tenant, TenantId,
};

/// Result of a reverse lookup by contact email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMatch {
    pub tenant_id: TenantId,
    pub tenant_name: String,
}

/// Port to the server-side tenant store.
///
/// The hosted backend owns the identity↔tenant association table and the
/// tenant table with its subscription fields; this trait is the only surface
/// the flow touches. Implementations must uphold:
///
/// - a tenant is created at most once per organization,
/// - an identity's association, once set, is never silently overwritten
///   (`attach_identity` to a different tenant is a conflict),
/// - `find_tenant_by_contact` is best-effort and may fail with
///   [`latch_core::FlowError::LookupUnavailable`]; callers degrade that to
///   "not found".
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Look up the tenant this identity is associated with, if any
    async fn find_associated_tenant(&self, identity: &IdentityId)
        -> FlowResult<Option<TenantId>>;

    /// Best-effort reverse lookup: find a tenant whose existing identities
    /// share this contact email
    async fn find_tenant_by_contact(&self, email: &str) -> FlowResult<Option<ContactMatch>>;

    /// Create a new tenant row with status `inactive` and no trial
    async fn create_tenant(&self, name: &str) -> FlowResult<Tenant>;

    /// Associate an identity with a tenant, optionally as its administrator.
    /// Re-attaching to the same tenant is a no-op; attaching to a different
    /// tenant is a conflict.
    async fn attach_identity(
        &self,
        identity: &Identity,
        tenant: &TenantId,
        as_admin: bool,
    ) -> FlowResult<()>;

    /// Fetch a tenant record
    async fn get_tenant(&self, tenant: &TenantId) -> FlowResult<Option<Tenant>>;

    /// Update a tenant's subscription fields
    async fn update_subscription(
        &self,
        tenant: &TenantId,
        status: SubscriptionStatus,
        tier: SubscriptionTier,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> FlowResult<()>;
}
