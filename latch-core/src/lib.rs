//! # latch-core: Session Resolution Flow primitives
//!
//! Core types shared by the Latch flow engine:
//!
//! - **Identifiers**: `IdentityId`, `TenantId`, `GuardToken`
//! - **Sessions**: the provider-owned `Session` plus the pure `SessionValidator`
//! - **Tenants**: organization records with subscription/trial state
//! - **Events**: provider event kinds and user-visible notices
//! - **Options**: typed, serde-loadable flow configuration
//!
//! The flow engine itself (tenant resolution, redirect decisions, loop
//! guards, orchestration) lives in `latch-flow`.

pub mod errors;
pub mod events;
pub mod ids;
pub mod options;
pub mod session;
pub mod tenant;

pub use errors::{FlowError, FlowResult};
pub use events::{AuthEventKind, FlowNotice, ProviderEvent};
pub use ids::{GuardToken, IdentityId, TenantId};
pub use options::FlowOptions;
pub use session::{Identity, Session, SessionValidator};
pub use tenant::{trial_days_remaining, SubscriptionStatus, SubscriptionTier, Tenant};
