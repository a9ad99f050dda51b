//! Loop/duplicate guard: ephemeral, TTL'd bookkeeping that suppresses
//! repeat processing and breaks redirect loops.
//!
//! A processing token is a short lease on "one flow in flight for this
//! identity". Tokens expire on their own; `end_processing` releases them
//! early so the next legitimate event gets through promptly. None of this
//! state is authoritative: the server-side directory remains the source of
//! truth for tenant and subscription state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use latch_core::{FlowError, FlowResult, GuardToken, IdentityId};

struct ProcessingEntry {
    token: GuardToken,
    created_at: Instant,
}

impl ProcessingEntry {
    fn expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

pub struct GuardStore {
    ttl: Duration,
    handled_ttl: Duration,
    processing: Mutex<HashMap<IdentityId, ProcessingEntry>>,
    handled: Mutex<HashMap<(IdentityId, String), Instant>>,
    break_loop: AtomicBool,
}

impl GuardStore {
    pub fn new(ttl: Duration, handled_ttl: Duration) -> Self {
        Self {
            ttl,
            handled_ttl,
            processing: Mutex::new(HashMap::new()),
            handled: Mutex::new(HashMap::new()),
            break_loop: AtomicBool::new(false),
        }
    }

    /// Record a new processing token for this identity. Rejected while a
    /// non-expired token exists.
    pub fn begin_processing(&self, identity: &IdentityId) -> FlowResult<GuardToken> {
        let mut processing = self.processing.lock();
        if let Some(entry) = processing.get(identity) {
            if !entry.expired(self.ttl) {
                return Err(FlowError::AlreadyProcessing);
            }
        }

        let token = GuardToken::new();
        processing.insert(
            identity.clone(),
            ProcessingEntry {
                token: token.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Release a processing token early, on success or failure. A stale
    /// token (already replaced) is ignored.
    pub fn end_processing(&self, identity: &IdentityId, token: &GuardToken) {
        let mut processing = self.processing.lock();
        if processing.get(identity).is_some_and(|e| e.token == *token) {
            processing.remove(identity);
        }
    }

    /// Has this exact (identity, path) combination been resolved within the
    /// handled-marker TTL?
    pub fn already_handled(&self, identity: &IdentityId, path: &str) -> bool {
        self.handled
            .lock()
            .get(&(identity.clone(), path.to_string()))
            .is_some_and(|recorded_at| recorded_at.elapsed() < self.handled_ttl)
    }

    /// Remember that (identity, path) has been resolved.
    pub fn record_handled(&self, identity: &IdentityId, path: &str) {
        self.handled
            .lock()
            .insert((identity.clone(), path.to_string()), Instant::now());
    }

    /// Drop expired processing tokens and handled markers. Returns how many
    /// entries were reclaimed.
    pub fn sweep_expired(&self) -> usize {
        let mut reclaimed = 0;

        let mut processing = self.processing.lock();
        let before = processing.len();
        processing.retain(|_, entry| !entry.expired(self.ttl));
        reclaimed += before - processing.len();
        drop(processing);

        let mut handled = self.handled.lock();
        let before = handled.len();
        handled.retain(|_, recorded_at| recorded_at.elapsed() < self.handled_ttl);
        reclaimed += before - handled.len();
        drop(handled);

        if reclaimed > 0 {
            debug!(reclaimed, "swept expired guard entries");
        }
        reclaimed
    }

    /// Wipe all guard state (sign-out, or manual recovery).
    pub fn clear_all(&self) {
        self.processing.lock().clear();
        self.handled.lock().clear();
        self.break_loop.store(false, Ordering::SeqCst);
    }

    /// Escape hatch: bypass all guards and force a default safe destination
    /// until cleared. For manual recovery when the guard bookkeeping itself
    /// has gone inconsistent.
    pub fn force_break(&self) {
        warn!("loop-break escape hatch engaged, guards bypassed");
        self.break_loop.store(true, Ordering::SeqCst);
    }

    pub fn break_requested(&self) -> bool {
        self.break_loop.load(Ordering::SeqCst)
    }

    pub fn reset_break(&self) {
        self.break_loop.store(false, Ordering::SeqCst);
    }
}
