use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;

use latch_core::{
    AuthEventKind, FlowNotice, FlowOptions, FlowResult, Identity, IdentityId, ProviderEvent,
    Session, SubscriptionStatus, SubscriptionTier, Tenant, TenantId,
};
use latch_flow::{
    paths, EventQueue, FlowOrchestrator, FlowState, MemoryDirectory, SessionRefresher,
    SubscriptionManager, TenantDirectory,
};

/// Test factory functions
fn test_session(id: &str, email: Option<&str>) -> Session {
    let now = Utc::now();
    let mut identity = Identity::new(id);
    if let Some(email) = email {
        identity = identity.with_email(email);
    }
    Session {
        identity,
        issued_at: now,
        expires_at: now + ChronoDuration::hours(1),
        access_token: format!("tok-{id}-0123456789"),
    }
}

fn expired_session(id: &str) -> Session {
    let mut session = test_session(id, None);
    session.expires_at = Utc::now() - ChronoDuration::minutes(5);
    session
}

fn signed_in(session: &Session, path: &str) -> ProviderEvent {
    ProviderEvent::new(AuthEventKind::SignedIn, Some(session.clone()), path)
}

fn flow(directory: &Arc<MemoryDirectory>) -> FlowOrchestrator<MemoryDirectory> {
    FlowOrchestrator::new(Arc::clone(directory), FlowOptions::default())
}

fn drain_notices(rx: &mut broadcast::Receiver<FlowNotice>) -> Vec<FlowNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

/// Seed a tenant with an attached identity. Returns the tenant id.
fn seed_tenant(
    directory: &MemoryDirectory,
    identity: &IdentityId,
    email: Option<&str>,
    status: SubscriptionStatus,
    trial_ends_at: Option<chrono::DateTime<Utc>>,
) -> TenantId {
    let mut tenant = Tenant::new("seeded org");
    tenant.subscription_status = status;
    tenant.subscription_tier = match status {
        SubscriptionStatus::Inactive => SubscriptionTier::Basic,
        _ => SubscriptionTier::Premium,
    };
    tenant.trial_ends_at = trial_ends_at;
    let tenant_id = tenant.id.clone();
    directory.insert_tenant(tenant);
    directory.insert_association(identity, email, &tenant_id, true);
    tenant_id
}

/// P1. Duplicate SIGNED_IN events create/attach at most once
#[tokio::test]
async fn duplicate_sign_in_burst_resolves_once() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let session = test_session("u-dup", Some("dup@biz.com"));

    // Sequential duplicates: second is suppressed by the handled set
    orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;
    let second = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(second.final_state, FlowState::Idle);
    assert!(second.redirect.is_none());
    assert_eq!(directory.create_calls(), 1);
    assert_eq!(directory.attach_calls(), 1);
}

/// P1b. Concurrent duplicates are excluded by the processing guard
#[tokio::test]
async fn concurrent_sign_ins_are_mutually_exclusive() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = Arc::new(flow(&directory));
    let session = test_session("u-race", Some("race@biz.com"));

    let a = orchestrator.handle_event(signed_in(&session, paths::AUTH));
    let b = orchestrator.handle_event(signed_in(&session, paths::AUTH));
    tokio::join!(a, b);

    assert_eq!(directory.create_calls(), 1);
    assert_eq!(directory.attach_calls(), 1);
    assert_eq!(directory.tenant_count(), 1);
}

/// P3. Trial expiry is a no-op in the future and downgrades exactly once
#[tokio::test]
async fn trial_expiry_transitions_exactly_once() {
    let directory = Arc::new(MemoryDirectory::new());
    let manager = SubscriptionManager::new(Arc::clone(&directory), FlowOptions::default());
    let identity = IdentityId::from("u-exp");

    // Future trial end: untouched
    let future_end = Utc::now() + ChronoDuration::days(3);
    let running = seed_tenant(
        &directory,
        &identity,
        None,
        SubscriptionStatus::Trialing,
        Some(future_end),
    );
    assert!(!manager.expire_trial_if_past(&running, future_end).await.unwrap());
    assert_eq!(directory.subscription_write_calls(), 0);

    // Past trial end: downgraded once, then repeated calls are no-ops
    let past_end = Utc::now() - ChronoDuration::days(1);
    let lapsed = seed_tenant(
        &directory,
        &IdentityId::from("u-exp2"),
        None,
        SubscriptionStatus::Trialing,
        Some(past_end),
    );
    assert!(manager.expire_trial_if_past(&lapsed, past_end).await.unwrap());
    assert!(!manager.expire_trial_if_past(&lapsed, past_end).await.unwrap());
    assert_eq!(directory.subscription_write_calls(), 1);

    let record = directory.association_of(&IdentityId::from("u-exp2")).unwrap();
    assert_eq!(record.0, lapsed);
}

/// P4. A contact-email match reuses the existing tenant instead of creating
#[tokio::test]
async fn contact_match_attaches_to_existing_tenant() {
    let directory = Arc::new(MemoryDirectory::new());
    let existing = seed_tenant(
        &directory,
        &IdentityId::from("u-original"),
        Some("shared@biz.com"),
        SubscriptionStatus::Active,
        None,
    );

    let orchestrator = flow(&directory);
    let session = test_session("u-second", Some("shared@biz.com"));
    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(directory.create_calls(), 0);
    let (tenant, is_admin) = directory.association_of(&session.identity.id).unwrap();
    assert_eq!(tenant, existing);
    assert!(!is_admin, "contact-match attach must be non-admin");
    assert_eq!(outcome.redirect.as_deref(), Some(paths::DASHBOARD));
}

/// P4b. An unavailable contact lookup degrades to "not found"
#[tokio::test]
async fn denied_contact_lookup_falls_back_to_creation() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.set_deny_contact_lookup(true);

    let orchestrator = flow(&directory);
    let session = test_session("u-denied", Some("denied@biz.com"));
    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(outcome.final_state, FlowState::Done);
    assert_eq!(directory.create_calls(), 1);
}

/// P5 + P7. Brand-new identity: one tenant, admin attach, 7-day trial,
/// redirect to the dashboard from the entry page
#[tokio::test]
async fn fresh_signup_creates_tenant_and_trial() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();

    let session = test_session("u1", Some("new@biz.com"));
    let before = Utc::now();
    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(directory.create_calls(), 1);
    let (tenant_id, is_admin) = directory.association_of(&session.identity.id).unwrap();
    assert!(is_admin, "tenant originator must be admin");

    let tenant = directory.get_tenant(&tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.subscription_status, SubscriptionStatus::Trialing);
    assert_eq!(tenant.subscription_tier, SubscriptionTier::Premium);

    let ends_at = tenant.trial_ends_at.unwrap();
    let expected = before + ChronoDuration::days(7);
    assert!((ends_at - expected).num_seconds().abs() < 60);

    assert_eq!(outcome.redirect.as_deref(), Some(paths::DASHBOARD));
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "trial_started"));
}

/// P8. Existing active tenant: no mutation, redirect to the dashboard
#[tokio::test]
async fn active_tenant_passes_through_untouched() {
    let directory = Arc::new(MemoryDirectory::new());
    let session = test_session("u2", Some("u2@biz.com"));
    seed_tenant(
        &directory,
        &session.identity.id,
        Some("u2@biz.com"),
        SubscriptionStatus::Active,
        None,
    );

    let orchestrator = flow(&directory);
    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(directory.create_calls(), 0);
    assert_eq!(directory.subscription_write_calls(), 0);
    assert_eq!(outcome.redirect.as_deref(), Some(paths::DASHBOARD));
}

/// P9. Lapsed trial: downgrade, trial-expired notice, redirect to payment
#[tokio::test]
async fn lapsed_trial_downgrades_and_redirects_to_payment() {
    let directory = Arc::new(MemoryDirectory::new());
    let session = test_session("u3", Some("u3@biz.com"));
    let tenant_id = seed_tenant(
        &directory,
        &session.identity.id,
        Some("u3@biz.com"),
        SubscriptionStatus::Trialing,
        Some(Utc::now() - ChronoDuration::days(1)),
    );

    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();
    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    let tenant = directory.get_tenant(&tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.subscription_status, SubscriptionStatus::Inactive);
    assert_eq!(tenant.subscription_tier, SubscriptionTier::Basic);

    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "trial_expired"));
    assert_eq!(outcome.redirect.as_deref(), Some(paths::PAYMENT));
}

/// P6. SIGNED_OUT clears all guard state and redirects to /auth
#[tokio::test]
async fn sign_out_clears_guards_and_goes_to_auth() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();

    // Leave some guard state behind
    let session = test_session("u-out", Some("out@biz.com"));
    orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;
    assert!(orchestrator.guard().already_handled(&session.identity.id, paths::AUTH));

    let outcome = orchestrator
        .handle_event(ProviderEvent::new(AuthEventKind::SignedOut, None, "/projects"))
        .await;

    assert_eq!(outcome.redirect.as_deref(), Some(paths::AUTH));
    assert!(!orchestrator.guard().already_handled(&session.identity.id, paths::AUTH));
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "signed_out"));
}

/// Password recovery bypasses tenant/subscription resolution entirely
#[tokio::test]
async fn password_recovery_goes_straight_to_reset() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);

    let outcome = orchestrator
        .handle_event(ProviderEvent::new(
            AuthEventKind::PasswordRecovery,
            None,
            paths::AUTH,
        ))
        .await;

    assert_eq!(outcome.redirect.as_deref(), Some(paths::RESET_PASSWORD));
    assert_eq!(directory.create_calls(), 0);
}

/// Provider identity ids are arbitrary strings; a multibyte id without a
/// contact email still resolves to a fresh tenant
#[tokio::test]
async fn multibyte_identity_without_email_resolves() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let session = test_session("abcdefg€xyz", None);

    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(outcome.final_state, FlowState::Done);
    assert_eq!(directory.create_calls(), 1);
    assert!(directory.association_of(&session.identity.id).is_some());
}

/// Pending onboarding routes to the onboarding page before any coverage rule
#[tokio::test]
async fn pending_onboarding_redirects_to_onboarding() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let session = test_session("u-onb", Some("onb@biz.com"));

    let event = signed_in(&session, paths::AUTH).with_onboarding_pending();
    let outcome = orchestrator.handle_event(event).await;

    assert_eq!(outcome.redirect.as_deref(), Some(paths::ONBOARDING));
    // Resolution still ran: the tenant exists once onboarding finishes
    assert_eq!(directory.create_calls(), 1);
}

/// An expired, unrefreshable session forces a sign-out with a notice
#[tokio::test]
async fn expired_session_forces_sign_out() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();

    let outcome = orchestrator
        .handle_event(signed_in(&expired_session("u-stale"), "/projects"))
        .await;

    assert_eq!(outcome.redirect.as_deref(), Some(paths::AUTH));
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "session_expired"));
    assert_eq!(directory.create_calls(), 0);
}

/// A forced sign-out while already on the login page keeps the user there
#[tokio::test]
async fn forced_sign_out_on_login_page_stays_put() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();

    let outcome = orchestrator
        .handle_event(signed_in(&expired_session("u-stale-auth"), paths::AUTH))
        .await;

    assert!(outcome.redirect.is_none());
    assert_eq!(outcome.final_state, FlowState::Done);
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "session_expired"));
}

/// TOKEN_REFRESHED with a valid session validates only; no redirect
#[tokio::test]
async fn token_refresh_with_valid_session_is_quiet() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);

    let session = test_session("u-refresh", None);
    let outcome = orchestrator
        .handle_event(ProviderEvent::new(
            AuthEventKind::TokenRefreshed,
            Some(session),
            "/projects",
        ))
        .await;

    assert_eq!(outcome.final_state, FlowState::Done);
    assert!(outcome.redirect.is_none());
    assert_eq!(directory.create_calls(), 0);
}

struct ReissuingRefresher;

#[async_trait]
impl SessionRefresher for ReissuingRefresher {
    async fn refresh(&self, session: &Session) -> FlowResult<Session> {
        let mut fresh = session.clone();
        fresh.expires_at = Utc::now() + ChronoDuration::hours(1);
        fresh.access_token = format!("{}-reissued", session.access_token);
        Ok(fresh)
    }
}

/// An expired session that CAN be refreshed continues through the flow
#[tokio::test]
async fn refreshable_session_continues_the_flow() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory).with_refresher(Arc::new(ReissuingRefresher));

    let outcome = orchestrator
        .handle_event(signed_in(&expired_session("u-renew"), paths::AUTH))
        .await;

    assert_eq!(outcome.final_state, FlowState::Done);
    assert_eq!(directory.create_calls(), 1);
    assert_eq!(outcome.redirect.as_deref(), Some(paths::DASHBOARD));
}

/// Tenant write failures abort the redirect and release the guard
#[tokio::test]
async fn tenant_write_failure_aborts_without_redirect() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.set_fail_writes(true);

    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();
    let session = test_session("u-fail", Some("fail@biz.com"));

    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;
    assert_eq!(outcome.final_state, FlowState::Aborted);
    assert!(outcome.redirect.is_none());
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "tenant_error"));

    // The guard was released: once writes recover, the same identity resolves
    directory.set_fail_writes(false);
    let retry = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;
    assert_eq!(retry.final_state, FlowState::Done);
    assert_eq!(directory.create_calls(), 1);
}

/// Subscription write failures surface a notice but do not abort navigation
#[tokio::test]
async fn subscription_write_failure_continues_without_coverage() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.set_fail_subscription_writes(true);

    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();
    let session = test_session("u-nosub", Some("nosub@biz.com"));

    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    // Tenant exists, but with no coverage the target is the payment page
    assert_eq!(outcome.final_state, FlowState::Done);
    assert_eq!(outcome.redirect.as_deref(), Some(paths::PAYMENT));
    assert_eq!(directory.create_calls(), 1);
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "subscription_error"));
}

/// Directory calls are bounded by the configured timeout
#[tokio::test(start_paused = true)]
async fn slow_directory_calls_time_out_and_abort() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.set_latency(Some(Duration::from_secs(30)));

    let orchestrator = flow(&directory);
    let mut notices = orchestrator.subscribe_notices();
    let session = test_session("u-slow", Some("slow@biz.com"));

    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(outcome.final_state, FlowState::Aborted);
    assert!(outcome.redirect.is_none());
    assert!(drain_notices(&mut notices)
        .iter()
        .any(|n| n.event_name() == "tenant_error"));
}

/// The break-loop escape hatch bypasses all guards and resolution
#[tokio::test]
async fn break_loop_forces_safe_destination() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    orchestrator.guard().force_break();

    let session = test_session("u-break", Some("break@biz.com"));
    let outcome = orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;

    assert_eq!(outcome.redirect.as_deref(), Some(paths::DASHBOARD));
    assert_eq!(directory.create_calls(), 0);
}

/// Re-resolution of an already-associated identity is a no-op
#[tokio::test]
async fn resolution_is_idempotent_across_paths() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = flow(&directory);
    let session = test_session("u-idem", Some("idem@biz.com"));

    orchestrator.handle_event(signed_in(&session, paths::AUTH)).await;
    let elsewhere = orchestrator.handle_event(signed_in(&session, "/projects")).await;

    // Different path, so not suppressed; but no second create/attach
    assert_eq!(elsewhere.final_state, FlowState::Done);
    assert!(elsewhere.redirect.is_none());
    assert_eq!(directory.create_calls(), 1);
    assert_eq!(directory.attach_calls(), 1);
}

/// Bursts into the event queue coalesce down to the most recent event
#[tokio::test(start_paused = true)]
async fn event_queue_coalesces_bursts() {
    let directory = Arc::new(MemoryDirectory::new());
    let orchestrator = Arc::new(flow(&directory));
    let mut outcomes = orchestrator.subscribe_outcomes();

    let queue = EventQueue::start(Arc::clone(&orchestrator));

    let superseded = test_session("u-first", Some("first@biz.com"));
    let latest = test_session("u-last", Some("last@biz.com"));
    assert!(queue.submit(signed_in(&superseded, paths::AUTH)));
    assert!(queue.submit(signed_in(&latest, paths::AUTH)));

    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.redirect.as_deref(), Some(paths::DASHBOARD));

    // Only the latest event was executed
    assert_eq!(directory.create_calls(), 1);
    assert!(directory.association_of(&superseded.identity.id).is_none());
    assert!(directory.association_of(&latest.identity.id).is_some());

    queue.shutdown().await.unwrap();
}
