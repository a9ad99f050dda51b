// Flow options and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::tenant::SubscriptionTier;

/// Main flow configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowOptions {
    /// Length of the automatic trial granted to brand-new tenants
    #[serde(with = "humantime_serde")]
    pub trial_length: Duration,
    /// Tier granted for the duration of a trial
    pub trial_tier: SubscriptionTier,
    /// Tier a tenant is downgraded to when its trial lapses
    pub downgrade_tier: SubscriptionTier,
    /// TTL of a processing guard token; a token older than this is treated
    /// as absent
    #[serde(with = "humantime_serde")]
    pub guard_ttl: Duration,
    /// How long a handled (identity, path) marker keeps suppressing
    /// re-processing of the same event
    #[serde(with = "humantime_serde")]
    pub handled_ttl: Duration,
    /// Window within which bursts of provider events are coalesced,
    /// keeping only the most recent
    #[serde(with = "humantime_serde")]
    pub debounce_window: Duration,
    /// How long a session validation verdict may be served from cache
    #[serde(with = "humantime_serde")]
    pub validation_cache_ttl: Duration,
    /// A session expiring within this window is refreshed proactively
    #[serde(with = "humantime_serde")]
    pub refresh_window: Duration,
    /// Upper bound on any tenant-directory call made by the orchestrator
    #[serde(with = "humantime_serde")]
    pub directory_timeout: Duration,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            trial_length: Duration::from_secs(7 * 24 * 3600), // 7 days
            trial_tier: SubscriptionTier::Premium,
            downgrade_tier: SubscriptionTier::Basic,
            guard_ttl: Duration::from_secs(5),
            handled_ttl: Duration::from_secs(30 * 60), // a browser session
            debounce_window: Duration::from_millis(300),
            validation_cache_ttl: Duration::from_secs(30),
            refresh_window: Duration::from_secs(300), // 5 minutes
            directory_timeout: Duration::from_secs(10),
        }
    }
}

impl FlowOptions {
    /// Validate the flow configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.trial_length.is_zero() {
            return Err("Trial length must be non-zero".to_string());
        }

        if self.guard_ttl.is_zero() {
            return Err("Guard TTL must be non-zero".to_string());
        }

        if self.handled_ttl.is_zero() {
            return Err("Handled-marker TTL must be non-zero".to_string());
        }

        if self.debounce_window >= self.guard_ttl {
            return Err("Debounce window must be shorter than the guard TTL".to_string());
        }

        if self.directory_timeout.is_zero() {
            return Err("Directory timeout must be non-zero".to_string());
        }

        Ok(())
    }
}
