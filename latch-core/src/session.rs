//! Provider-owned sessions and the pure session validator.
//!
//! The validator only answers questions; acting on the answers (refreshing,
//! forcing a sign-out) is the orchestrator's job.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ids::IdentityId;

/// The authenticated principal for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<IdentityId>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A session as handed to us by the auth provider. The flow only reads it,
/// never persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_token: String,
}

impl Session {
    /// Last few characters of the access token, used to key the validation
    /// cache without holding the full token.
    pub fn token_suffix(&self) -> &str {
        let token = self.access_token.as_str();
        let mut start = token.len().saturating_sub(8);
        while !token.is_char_boundary(start) {
            start -= 1;
        }
        &token[start..]
    }
}

struct CachedVerdict {
    valid: bool,
    cached_at: Instant,
}

/// Pure validity/refresh queries over sessions, with a short-lived result
/// cache to absorb bursts of duplicate provider events.
pub struct SessionValidator {
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CachedVerdict>>,
}

impl SessionValidator {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// False if the session is absent or its expiry is not in the future.
    /// Verdicts are cached for the configured TTL, keyed by identity plus
    /// token suffix.
    pub fn is_valid(&self, session: Option<&Session>) -> bool {
        let Some(session) = session else {
            return false;
        };

        let key = format!("{}:{}", session.identity.id, session.token_suffix());

        if let Some(entry) = self.cache.read().get(&key) {
            if entry.cached_at.elapsed() < self.cache_ttl {
                return entry.valid;
            }
        }

        let valid = session.expires_at > Utc::now();
        self.cache.write().insert(
            key,
            CachedVerdict {
                valid,
                cached_at: Instant::now(),
            },
        );
        valid
    }

    /// True if the session expires within `window` from now. Not cached;
    /// the answer changes as the window approaches.
    pub fn needs_refresh(&self, session: &Session, window: Duration) -> bool {
        let horizon = Utc::now()
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        session.expires_at <= horizon
    }

    /// Drop all cached verdicts.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn session_expiring_in(secs: i64) -> Session {
        let now = Utc::now();
        Session {
            identity: Identity::new("u-1").with_email("u1@example.com"),
            issued_at: now - ChronoDuration::hours(1),
            expires_at: now + ChronoDuration::seconds(secs),
            // Distinct token per expiry so fixtures never share a cache key
            access_token: format!("tok-abcdef-{secs}"),
        }
    }

    #[test]
    fn absent_session_is_invalid() {
        let validator = SessionValidator::new(Duration::from_secs(30));
        assert!(!validator.is_valid(None));
    }

    #[test]
    fn expired_session_is_invalid() {
        let validator = SessionValidator::new(Duration::from_secs(30));
        assert!(!validator.is_valid(Some(&session_expiring_in(-10))));
        assert!(validator.is_valid(Some(&session_expiring_in(3600))));
    }

    #[test]
    fn verdict_is_cached_within_ttl() {
        let validator = SessionValidator::new(Duration::from_secs(30));
        let session = session_expiring_in(3600);
        assert!(validator.is_valid(Some(&session)));
        // Same identity+token within the TTL hits the cache and agrees
        assert!(validator.is_valid(Some(&session)));
    }

    #[test]
    fn expired_cache_entry_is_recomputed() {
        let validator = SessionValidator::new(Duration::ZERO);
        let mut session = session_expiring_in(1);
        assert!(validator.is_valid(Some(&session)));
        session.expires_at = Utc::now() - ChronoDuration::seconds(1);
        // TTL of zero means every call recomputes
        assert!(!validator.is_valid(Some(&session)));
    }

    #[test]
    fn refresh_window() {
        let validator = SessionValidator::new(Duration::from_secs(30));
        let window = Duration::from_secs(300);
        assert!(validator.needs_refresh(&session_expiring_in(100), window));
        assert!(!validator.needs_refresh(&session_expiring_in(3600), window));
    }

    #[test]
    fn token_suffix_is_short() {
        let mut session = session_expiring_in(10);
        session.access_token = "tok-abcdef123456".to_string();
        assert_eq!(session.token_suffix(), "ef123456");

        session.access_token = "abc".to_string();
        assert_eq!(session.token_suffix(), "abc");
    }

    #[test]
    fn verdicts_are_keyed_per_token() {
        let validator = SessionValidator::new(Duration::from_secs(30));
        let expired = session_expiring_in(-10);
        let live = session_expiring_in(3600);

        // Same identity, different tokens: the cached verdict for one must
        // not bleed into the other
        assert!(!validator.is_valid(Some(&expired)));
        assert!(validator.is_valid(Some(&live)));
    }
}
