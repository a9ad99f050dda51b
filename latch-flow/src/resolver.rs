//! Tenant resolution: decide whether an identity joins an existing tenant
//! or originates a new one.
//!
//! Policy order when no association exists:
//!
//! 1. reuse a tenant found by contact-email match (attach as non-admin),
//! 2. create a brand-new tenant (attach as admin).
//!
//! Re-resolving an identity that already has an association is a no-op, and
//! a create/attach that loses a race to a concurrent resolution falls back
//! to re-reading and reusing the winner's association.

use std::sync::Arc;

use tracing::{debug, info, warn};

use latch_core::{FlowError, FlowResult, Identity, TenantId};

use crate::directory::TenantDirectory;

/// Outcome of resolving an identity to a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantResolution {
    pub tenant_id: TenantId,
    /// A brand-new tenant was created by this resolution
    pub created: bool,
    /// The identity was attached during this resolution (false when the
    /// association already existed)
    pub attached: bool,
}

pub struct TenantResolver<D: TenantDirectory> {
    directory: Arc<D>,
}

impl<D: TenantDirectory> TenantResolver<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    /// Resolve the identity to a tenant, creating or attaching as needed.
    pub async fn resolve(&self, identity: &Identity) -> FlowResult<TenantResolution> {
        // Existing association short-circuits everything
        if let Some(tenant_id) = self.directory.find_associated_tenant(&identity.id).await? {
            debug!(identity = %identity.id, tenant = %tenant_id, "identity already associated");
            return Ok(TenantResolution {
                tenant_id,
                created: false,
                attached: false,
            });
        }

        // Prefer reusing a tenant that another identity with the same
        // contact email already belongs to. The lookup is best-effort:
        // unavailable means "not found", never a failed flow.
        if let Some(email) = &identity.email {
            match self.directory.find_tenant_by_contact(email).await {
                Ok(Some(matched)) => {
                    info!(
                        identity = %identity.id,
                        tenant = %matched.tenant_id,
                        "reusing tenant found by contact match"
                    );
                    return self
                        .attach(identity, matched.tenant_id, false, false)
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(identity = %identity.id, error = %e, "contact lookup unavailable, treating as not found");
                }
            }
        }

        let name = organization_name(identity);
        let tenant = match self.directory.create_tenant(&name).await {
            Ok(tenant) => tenant,
            Err(e) if e.is_conflict() => {
                // Lost a creation race; the winner's association is
                // authoritative
                return self.reuse_after_conflict(identity, e).await;
            }
            Err(e) => return Err(e),
        };

        info!(identity = %identity.id, tenant = %tenant.id, name = %tenant.name, "created tenant");
        self.attach(identity, tenant.id, true, true).await
    }

    async fn attach(
        &self,
        identity: &Identity,
        tenant_id: TenantId,
        as_admin: bool,
        created: bool,
    ) -> FlowResult<TenantResolution> {
        match self
            .directory
            .attach_identity(identity, &tenant_id, as_admin)
            .await
        {
            Ok(()) => Ok(TenantResolution {
                tenant_id,
                created,
                attached: true,
            }),
            Err(e) if e.is_conflict() => self.reuse_after_conflict(identity, e).await,
            Err(e) => Err(e),
        }
    }

    /// A conflict means some concurrent resolution already attached this
    /// identity; re-read and reuse that association instead of surfacing
    /// an error.
    async fn reuse_after_conflict(
        &self,
        identity: &Identity,
        conflict: FlowError,
    ) -> FlowResult<TenantResolution> {
        warn!(identity = %identity.id, error = %conflict, "resolution raced, reusing existing association");
        match self.directory.find_associated_tenant(&identity.id).await? {
            Some(tenant_id) => Ok(TenantResolution {
                tenant_id,
                created: false,
                attached: false,
            }),
            None => Err(conflict),
        }
    }
}

/// Derive an organization name for a fresh signup. The signup form's company
/// name is not part of the provider event, so fall back to the contact
/// email's local part.
fn organization_name(identity: &Identity) -> String {
    identity
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .map(|local| format!("{local}'s workspace"))
        .unwrap_or_else(|| {
            // Identity ids are arbitrary provider strings; truncate on a
            // char boundary, never a byte offset
            let prefix: String = identity.id.as_str().chars().take(8).collect();
            format!("workspace-{prefix}")
        })
}
