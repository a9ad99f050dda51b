//! # latch-flow: Session Resolution Flow engine
//!
//! Given an auth-provider event (sign-in, sign-out, token refresh, password
//! recovery) and a session, this crate decides:
//!
//! - whether the acting identity needs a new tenant record created,
//! - whether it should be attached to an existing tenant instead,
//! - whether a trial subscription should be started or expired,
//! - where the browser should navigate next,
//!
//! while suppressing duplicate processing and redirect loops caused by the
//! provider re-firing events.
//!
//! ## Architecture
//!
//! ```text
//! provider callback -> EventQueue (debounce/coalesce)
//!                          |
//!                   FlowOrchestrator (state machine)
//!                    |      |        |         |
//!              GuardStore  TenantResolver  SubscriptionManager
//!                               |               |
//!                          TenantDirectory (backend port)
//! ```
//!
//! The tenant directory is a port: the hosted backend stays an external
//! collaborator, and `MemoryDirectory` serves tests and development. The
//! guard store is ephemeral scratch space, never the source of truth for
//! tenant or subscription state.

pub mod directory;
pub mod guard;
pub mod orchestrator;
pub mod queue;
pub mod redirect;
pub mod resolver;
pub mod subscription;

pub use directory::{memory::MemoryDirectory, ContactMatch, TenantDirectory};
pub use guard::GuardStore;
pub use orchestrator::{FlowOrchestrator, FlowOutcome, FlowState, SessionRefresher};
pub use queue::EventQueue;
pub use redirect::{decide, paths, RedirectInput};
pub use resolver::{TenantResolution, TenantResolver};
pub use subscription::SubscriptionManager;
