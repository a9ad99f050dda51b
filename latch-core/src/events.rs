use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TenantId;
use crate::session::Session;

/// Event kinds delivered by the auth provider's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    InitialSession,
    PasswordRecovery,
}

impl AuthEventKind {
    /// Event name as emitted by the provider
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::InitialSession => "INITIAL_SESSION",
            Self::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

/// One incoming provider event, together with the navigation context it
/// arrived in. These are the messages fed to the flow queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
    /// Path the browser is currently on
    pub current_path: String,
    /// Percent-encoded return-to hint from the navigation request, if any
    pub return_to: Option<String>,
    /// Whether the identity has finished onboarding, per the profile
    /// metadata the provider adapter reads alongside the session
    pub onboarding_completed: bool,
}

impl ProviderEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>, current_path: impl Into<String>) -> Self {
        Self {
            kind,
            session,
            current_path: current_path.into(),
            return_to: None,
            onboarding_completed: true,
        }
    }

    pub fn with_return_to(mut self, return_to: impl Into<String>) -> Self {
        self.return_to = Some(return_to.into());
        self
    }

    pub fn with_onboarding_pending(mut self) -> Self {
        self.onboarding_completed = false;
        self
    }
}

/// User-visible notices emitted by the flow (rendered as toasts upstream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowNotice {
    /// The identity signed out
    SignedOut { at: DateTime<Utc> },

    /// The session expired and could not be refreshed; a sign-out was forced
    SessionExpired { at: DateTime<Utc> },

    /// A trial was activated for a freshly created tenant
    TrialStarted {
        tenant_id: TenantId,
        ends_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// A running trial lapsed and the tenant was downgraded
    TrialExpired {
        tenant_id: TenantId,
        at: DateTime<Utc>,
    },

    /// Tenant creation/attachment failed
    TenantError { message: String, at: DateTime<Utc> },

    /// A subscription write failed; the flow continued without coverage
    SubscriptionError { message: String, at: DateTime<Utc> },
}

impl FlowNotice {
    /// Get notice type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SignedOut { .. } => "signed_out",
            Self::SessionExpired { .. } => "session_expired",
            Self::TrialStarted { .. } => "trial_started",
            Self::TrialExpired { .. } => "trial_expired",
            Self::TenantError { .. } => "tenant_error",
            Self::SubscriptionError { .. } => "subscription_error",
        }
    }

    /// Get the timestamp from any notice
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::SignedOut { at }
            | Self::SessionExpired { at }
            | Self::TrialStarted { at, .. }
            | Self::TrialExpired { at, .. }
            | Self::TenantError { at, .. }
            | Self::SubscriptionError { at, .. } => at,
        }
    }
}
