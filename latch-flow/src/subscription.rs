//! Trial subscription management.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use latch_core::{FlowOptions, FlowResult, SubscriptionStatus, TenantId};

use crate::directory::TenantDirectory;

pub struct SubscriptionManager<D: TenantDirectory> {
    directory: Arc<D>,
    options: FlowOptions,
}

impl<D: TenantDirectory> SubscriptionManager<D> {
    pub fn new(directory: Arc<D>, options: FlowOptions) -> Self {
        Self { directory, options }
    }

    /// Start the fixed-length trial for a tenant with no prior subscription
    /// state. Returns the trial end timestamp.
    ///
    /// Callers gate this on the tenant being brand-new (status absent or
    /// `inactive`) and the event being a fresh signup.
    pub async fn start_trial(&self, tenant: &TenantId) -> FlowResult<DateTime<Utc>> {
        let trial_length = Duration::from_std(self.options.trial_length)
            .unwrap_or_else(|_| Duration::days(7));
        let ends_at = Utc::now() + trial_length;

        self.directory
            .update_subscription(
                tenant,
                SubscriptionStatus::Trialing,
                self.options.trial_tier,
                Some(ends_at),
            )
            .await?;

        info!(tenant = %tenant, %ends_at, "trial started");
        Ok(ends_at)
    }

    /// Downgrade a tenant whose trial end is strictly in the past. Returns
    /// true when a downgrade happened, so the caller can notify the user.
    /// A trial ending at or after `now` is left untouched, and a tenant no
    /// longer trialing is too, so repeated calls downgrade exactly once.
    pub async fn expire_trial_if_past(
        &self,
        tenant: &TenantId,
        trial_ends_at: DateTime<Utc>,
    ) -> FlowResult<bool> {
        let now = Utc::now();
        if trial_ends_at >= now {
            debug!(tenant = %tenant, %trial_ends_at, "trial still running");
            return Ok(false);
        }

        let current = self.directory.get_tenant(tenant).await?;
        match current {
            Some(record) if record.subscription_status == SubscriptionStatus::Trialing => {}
            _ => return Ok(false),
        }

        self.directory
            .update_subscription(
                tenant,
                SubscriptionStatus::Inactive,
                self.options.downgrade_tier,
                None,
            )
            .await?;

        info!(tenant = %tenant, %trial_ends_at, "trial expired, tenant downgraded");
        Ok(true)
    }
}
