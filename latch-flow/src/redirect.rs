//! The Redirect Decision Function: a pure mapping from resolved state to a
//! navigation target.

use percent_encoding::percent_decode_str;

/// Navigation targets the flow can redirect to.
pub mod paths {
    pub const AUTH: &str = "/auth";
    pub const RESET_PASSWORD: &str = "/auth/reset-password";
    pub const DASHBOARD: &str = "/dashboard";
    pub const ONBOARDING: &str = "/onboarding";
    pub const PAYMENT: &str = "/payment";
}

/// Everything `decide` is allowed to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectInput<'a> {
    /// Path the browser is currently on
    pub current_path: &'a str,
    /// The identity has a tenant association
    pub has_tenant: bool,
    /// The tenant has a paid subscription in good standing
    pub has_active_subscription: bool,
    /// The tenant is inside a still-valid trial window
    pub in_trial: bool,
    /// The identity is gated on having subscription coverage
    pub needs_subscription: bool,
    /// Percent-encoded return-to hint from the navigation request
    pub return_to: Option<&'a str>,
    /// Onboarding has been completed for this identity
    pub onboarding_completed: bool,
}

/// Decide where to navigate, or `None` for no redirect.
///
/// Rules, in order:
///
/// 0. no tenant association, or onboarding unfinished -> onboarding page
/// 1. needs a subscription with neither active coverage nor a valid trial
///    -> payment page
/// 2. a return-to hint is present -> that decoded path
/// 3. currently on the login/entry page -> dashboard
/// 4. otherwise -> no redirect
///
/// A computed target equal to the current path collapses to `None`.
pub fn decide(input: &RedirectInput<'_>) -> Option<String> {
    let target = if !input.has_tenant || !input.onboarding_completed {
        Some(paths::ONBOARDING.to_string())
    } else if input.needs_subscription && !input.has_active_subscription && !input.in_trial {
        Some(paths::PAYMENT.to_string())
    } else if let Some(hint) = input.return_to {
        decode_return_to(hint)
    } else if input.current_path == paths::AUTH {
        Some(paths::DASHBOARD.to_string())
    } else {
        None
    };

    // Redirecting to the page we are already on is a no-op
    target.filter(|t| t != input.current_path)
}

/// Decode a percent-encoded return-to hint. Only absolute in-app paths are
/// honored; anything else is ignored rather than risking an open redirect.
fn decode_return_to(hint: &str) -> Option<String> {
    let decoded = percent_decode_str(hint).decode_utf8().ok()?.into_owned();
    if decoded.starts_with('/') && !decoded.starts_with("//") {
        Some(decoded)
    } else {
        None
    }
}
