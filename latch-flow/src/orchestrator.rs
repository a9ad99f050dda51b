//! Flow orchestrator: the state machine sequencing session validation,
//! tenant resolution, subscription resolution, and the redirect decision
//! for each incoming provider event.
//!
//! The provider-facing entry point never returns an error; failures inside
//! the flow become notices and log lines, and the user is left on the
//! current page rather than risking an incorrect redirect.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use latch_core::{
    AuthEventKind, FlowError, FlowNotice, FlowOptions, FlowResult, Identity, ProviderEvent,
    Session, SessionValidator, SubscriptionStatus, SubscriptionTier, Tenant,
};

use crate::directory::TenantDirectory;
use crate::guard::GuardStore;
use crate::redirect::{decide, paths, RedirectInput};
use crate::resolver::{TenantResolution, TenantResolver};
use crate::subscription::SubscriptionManager;

/// States the orchestrator walks through per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    ValidatingSession,
    ResolvingTenant,
    ResolvingSubscription,
    DecidingRedirect,
    Redirecting,
    Done,
    Aborted,
}

/// What one event resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    /// Target path, or `None` for no navigation
    pub redirect: Option<String>,
    pub final_state: FlowState,
}

impl FlowOutcome {
    fn done(redirect: Option<String>) -> Self {
        Self {
            redirect,
            final_state: FlowState::Done,
        }
    }

    fn redirect_to(path: &str) -> Self {
        Self {
            redirect: Some(path.to_string()),
            final_state: FlowState::Done,
        }
    }

    fn suppressed() -> Self {
        Self {
            redirect: None,
            final_state: FlowState::Idle,
        }
    }

    fn aborted() -> Self {
        Self {
            redirect: None,
            final_state: FlowState::Aborted,
        }
    }
}

/// Port for asking the auth provider to refresh a session.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh(&self, session: &Session) -> FlowResult<Session>;
}

enum ValidatedSession {
    Valid(Session),
    /// Invalid and unrefreshable: forced sign-out
    Expired,
}

pub struct FlowOrchestrator<D: TenantDirectory> {
    directory: Arc<D>,
    resolver: TenantResolver<D>,
    subscriptions: SubscriptionManager<D>,
    guard: GuardStore,
    validator: SessionValidator,
    refresher: Option<Arc<dyn SessionRefresher>>,
    options: FlowOptions,
    notices: broadcast::Sender<FlowNotice>,
    outcomes: broadcast::Sender<FlowOutcome>,
}

impl<D: TenantDirectory> FlowOrchestrator<D> {
    pub fn new(directory: Arc<D>, options: FlowOptions) -> Self {
        let (notices, _) = broadcast::channel(64);
        let (outcomes, _) = broadcast::channel(64);
        Self {
            resolver: TenantResolver::new(Arc::clone(&directory)),
            subscriptions: SubscriptionManager::new(Arc::clone(&directory), options.clone()),
            guard: GuardStore::new(options.guard_ttl, options.handled_ttl),
            validator: SessionValidator::new(options.validation_cache_ttl),
            directory,
            refresher: None,
            options,
            notices,
            outcomes,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Subscribe to user-visible notices (toasts)
    pub fn subscribe_notices(&self) -> broadcast::Receiver<FlowNotice> {
        self.notices.subscribe()
    }

    /// Subscribe to per-event outcomes (navigation decisions)
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<FlowOutcome> {
        self.outcomes.subscribe()
    }

    pub fn guard(&self) -> &GuardStore {
        &self.guard
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    /// Process one provider event. Infallible by design: this is what the
    /// provider's callback calls, and that callback must not throw.
    pub async fn handle_event(&self, event: ProviderEvent) -> FlowOutcome {
        debug!(kind = event.kind.event_name(), path = %event.current_path, "provider event");

        let outcome = match event.kind {
            AuthEventKind::SignedOut => self.handle_signed_out(),
            AuthEventKind::PasswordRecovery => FlowOutcome::redirect_to(paths::RESET_PASSWORD),
            AuthEventKind::TokenRefreshed | AuthEventKind::InitialSession => {
                match self.validate_session(&event).await {
                    ValidatedSession::Valid(_) => FlowOutcome::done(None),
                    ValidatedSession::Expired => self.force_sign_out(&event.current_path),
                }
            }
            AuthEventKind::SignedIn => self.handle_signed_in(&event).await,
        };

        if let Some(path) = &outcome.redirect {
            info!(target = %path, state = ?outcome.final_state, "flow resolved");
        }
        let _ = self.outcomes.send(outcome.clone());
        outcome
    }

    fn handle_signed_out(&self) -> FlowOutcome {
        // Sign-out wipes all ephemeral guard state, then goes to the login
        // page regardless of where we are
        self.guard.clear_all();
        self.validator.clear_cache();
        self.notify(FlowNotice::SignedOut { at: Utc::now() });
        FlowOutcome::redirect_to(paths::AUTH)
    }

    fn force_sign_out(&self, current_path: &str) -> FlowOutcome {
        self.guard.clear_all();
        self.validator.clear_cache();
        self.notify(FlowNotice::SessionExpired { at: Utc::now() });
        // Already on the login page: signal the expiry without a redundant
        // navigation to the page we are on
        if current_path == paths::AUTH {
            return FlowOutcome::done(None);
        }
        FlowOutcome::redirect_to(paths::AUTH)
    }

    fn enter(&self, state: FlowState) {
        debug!(?state, "flow transition");
    }

    async fn handle_signed_in(&self, event: &ProviderEvent) -> FlowOutcome {
        // Manual recovery: bypass every guard and land somewhere safe
        if self.guard.break_requested() {
            warn!("loop-break engaged, forcing default destination");
            return FlowOutcome::redirect_to(paths::DASHBOARD);
        }

        self.enter(FlowState::ValidatingSession);
        let session = match self.validate_session(event).await {
            ValidatedSession::Valid(session) => session,
            ValidatedSession::Expired => return self.force_sign_out(&event.current_path),
        };
        let identity = session.identity.clone();

        if self.guard.already_handled(&identity.id, &event.current_path) {
            debug!(identity = %identity.id, path = %event.current_path, "already handled, suppressing");
            return FlowOutcome::suppressed();
        }

        self.guard.sweep_expired();
        let token = match self.guard.begin_processing(&identity.id) {
            Ok(token) => token,
            Err(_) => {
                debug!(identity = %identity.id, "flow already in flight, suppressing");
                return FlowOutcome::suppressed();
            }
        };

        // Settle barrier: let any state updates from the validation step
        // land before resolution and navigation are computed
        tokio::task::yield_now().await;

        self.enter(FlowState::ResolvingTenant);
        let resolution = match self.with_timeout(self.resolver.resolve(&identity)).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(identity = %identity.id, error = %e, "tenant resolution failed, aborting");
                self.notify(FlowNotice::TenantError {
                    message: e.to_string(),
                    at: Utc::now(),
                });
                self.guard.end_processing(&identity.id, &token);
                return FlowOutcome::aborted();
            }
        };

        self.enter(FlowState::ResolvingSubscription);
        let tenant = match self.resolve_subscription(&identity, &resolution).await {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(identity = %identity.id, error = %e, "subscription resolution failed, aborting");
                self.notify(FlowNotice::TenantError {
                    message: e.to_string(),
                    at: Utc::now(),
                });
                self.guard.end_processing(&identity.id, &token);
                return FlowOutcome::aborted();
            }
        };

        self.enter(FlowState::DecidingRedirect);
        let now = Utc::now();
        let input = RedirectInput {
            current_path: &event.current_path,
            // Resolution either found or created a tenant by this point, so
            // only the onboarding status can route to the onboarding page
            has_tenant: true,
            has_active_subscription: tenant.has_active_subscription(),
            in_trial: tenant.in_valid_trial(now),
            needs_subscription: true,
            return_to: event.return_to.as_deref(),
            onboarding_completed: event.onboarding_completed,
        };
        let redirect = decide(&input);
        if redirect.is_some() {
            self.enter(FlowState::Redirecting);
        }

        self.guard.record_handled(&identity.id, &event.current_path);
        self.guard.end_processing(&identity.id, &token);

        FlowOutcome::done(redirect)
    }

    /// Fetch the tenant and settle its trial state: start a trial for a
    /// brand-new tenant, expire a lapsed one. Subscription write failures
    /// are reported but do not abort the flow; the tenant is then treated
    /// as having no coverage for redirect purposes.
    async fn resolve_subscription(
        &self,
        identity: &Identity,
        resolution: &TenantResolution,
    ) -> FlowResult<Tenant> {
        let mut tenant = self
            .with_timeout(self.directory.get_tenant(&resolution.tenant_id))
            .await?
            .ok_or_else(|| {
                FlowError::internal(format!(
                    "resolved tenant {} does not exist",
                    resolution.tenant_id
                ))
            })?;

        if resolution.created && tenant.subscription_status == SubscriptionStatus::Inactive {
            match self
                .with_timeout(self.subscriptions.start_trial(&tenant.id))
                .await
            {
                Ok(ends_at) => {
                    self.notify(FlowNotice::TrialStarted {
                        tenant_id: tenant.id.clone(),
                        ends_at,
                        at: Utc::now(),
                    });
                    tenant.subscription_status = SubscriptionStatus::Trialing;
                    tenant.subscription_tier = self.options.trial_tier;
                    tenant.trial_ends_at = Some(ends_at);
                }
                Err(e) => {
                    warn!(identity = %identity.id, tenant = %tenant.id, error = %e, "trial activation failed");
                    self.notify(FlowNotice::SubscriptionError {
                        message: e.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        } else if tenant.trial_lapsed(Utc::now()) {
            let ends_at = tenant
                .trial_ends_at
                .unwrap_or_else(Utc::now);
            match self
                .with_timeout(self.subscriptions.expire_trial_if_past(&tenant.id, ends_at))
                .await
            {
                Ok(true) => {
                    self.notify(FlowNotice::TrialExpired {
                        tenant_id: tenant.id.clone(),
                        at: Utc::now(),
                    });
                    tenant.subscription_status = SubscriptionStatus::Inactive;
                    tenant.subscription_tier = self.options.downgrade_tier;
                    tenant.trial_ends_at = None;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(identity = %identity.id, tenant = %tenant.id, error = %e, "trial expiry write failed");
                    self.notify(FlowNotice::SubscriptionError {
                        message: e.to_string(),
                        at: Utc::now(),
                    });
                    // No coverage for redirect purposes
                    tenant.subscription_status = SubscriptionStatus::Inactive;
                    tenant.subscription_tier = SubscriptionTier::Basic;
                    tenant.trial_ends_at = None;
                }
            }
        }

        Ok(tenant)
    }

    /// Check validity and refresh proactively when the expiry window is
    /// close. Only an invalid session that cannot be refreshed is terminal.
    async fn validate_session(&self, event: &ProviderEvent) -> ValidatedSession {
        let Some(session) = &event.session else {
            return ValidatedSession::Expired;
        };

        if self.validator.is_valid(Some(session)) {
            if self
                .validator
                .needs_refresh(session, self.options.refresh_window)
            {
                if let Some(refresher) = &self.refresher {
                    match refresher.refresh(session).await {
                        Ok(fresh) => return ValidatedSession::Valid(fresh),
                        Err(e) => {
                            // Still valid; keep going on the current session
                            debug!(error = %e, "proactive refresh failed, continuing with current session");
                        }
                    }
                }
            }
            return ValidatedSession::Valid(session.clone());
        }

        if let Some(refresher) = &self.refresher {
            if let Ok(fresh) = refresher.refresh(session).await {
                return ValidatedSession::Valid(fresh);
            }
        }
        ValidatedSession::Expired
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = FlowResult<T>>,
    ) -> FlowResult<T> {
        match tokio::time::timeout(self.options.directory_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::DirectoryTimeout(self.options.directory_timeout)),
        }
    }

    fn notify(&self, notice: FlowNotice) {
        // Nobody listening is fine
        let _ = self.notices.send(notice);
    }
}
