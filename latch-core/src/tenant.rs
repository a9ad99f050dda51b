//! Tenant (organization) records and subscription/trial accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TenantId;

/// Subscription lifecycle of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// No subscription and no running trial
    Inactive,
    /// Time-boxed trial in progress
    Trialing,
    /// Paid subscription
    Active,
}

/// Subscription tier. Trials run on the elevated tier; expiry downgrades
/// back to the default tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Basic,
    Premium,
}

/// An organization/workspace record. Created at most once per organization;
/// many identities may reference one tenant, each identity at most one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub subscription_status: SubscriptionStatus,
    pub subscription_tier: SubscriptionTier,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl Tenant {
    /// Create a fresh tenant with no subscription state and no trial.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            subscription_status: SubscriptionStatus::Inactive,
            subscription_tier: SubscriptionTier::Basic,
            trial_ends_at: None,
        }
    }

    /// Paid subscription in good standing
    pub fn has_active_subscription(&self) -> bool {
        self.subscription_status == SubscriptionStatus::Active
    }

    /// Trialing with the trial window still open. A trial ending exactly
    /// at `now` still counts as valid; expiry requires a strictly past end.
    pub fn in_valid_trial(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status == SubscriptionStatus::Trialing
            && self.trial_ends_at.is_some_and(|ends| ends >= now)
    }

    /// Trialing but the trial end is strictly in the past
    pub fn trial_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status == SubscriptionStatus::Trialing
            && self.trial_ends_at.is_some_and(|ends| ends < now)
    }

    /// Either an active subscription or a still-valid trial
    pub fn has_coverage(&self, now: DateTime<Utc>) -> bool {
        self.has_active_subscription() || self.in_valid_trial(now)
    }
}

/// Days remaining in a trial for display: `ceil((trial_ends_at - now) / 1d)`,
/// clamped to 0 once the trial end has passed.
pub fn trial_days_remaining(trial_ends_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (trial_ends_at - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 86_399) / 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn days_remaining_rounds_up_and_clamps() {
        let now = Utc::now();
        assert_eq!(trial_days_remaining(now + Duration::days(7), now), 7);
        assert_eq!(trial_days_remaining(now + Duration::seconds(1), now), 1);
        assert_eq!(
            trial_days_remaining(now + Duration::days(2) + Duration::hours(1), now),
            3
        );
        assert_eq!(trial_days_remaining(now, now), 0);
        assert_eq!(trial_days_remaining(now - Duration::days(3), now), 0);
    }

    #[test]
    fn trial_validity_boundaries() {
        let now = Utc::now();
        let mut tenant = Tenant::new("acme");
        tenant.subscription_status = SubscriptionStatus::Trialing;

        // Ends exactly now: still valid, not lapsed
        tenant.trial_ends_at = Some(now);
        assert!(tenant.in_valid_trial(now));
        assert!(!tenant.trial_lapsed(now));
        assert!(tenant.has_coverage(now));

        // Strictly past: lapsed
        tenant.trial_ends_at = Some(now - Duration::seconds(1));
        assert!(!tenant.in_valid_trial(now));
        assert!(tenant.trial_lapsed(now));
        assert!(!tenant.has_coverage(now));
    }

    #[test]
    fn fresh_tenant_has_no_subscription_state() {
        let tenant = Tenant::new("acme");
        assert_eq!(tenant.subscription_status, SubscriptionStatus::Inactive);
        assert_eq!(tenant.subscription_tier, SubscriptionTier::Basic);
        assert!(tenant.trial_ends_at.is_none());
        assert!(!tenant.has_coverage(Utc::now()));
    }
}
