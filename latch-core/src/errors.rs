use std::time::Duration;
use thiserror::Error;

/// Result type for flow operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised inside the session-resolution flow.
///
/// These never escape the orchestrator boundary: the provider-facing entry
/// point converts them into notices and log lines, so the auth provider's
/// callback can never observe a panic or an `Err`.
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    /// Session is invalid/expired and could not be refreshed. Terminal for
    /// the current event; the orchestrator forces a sign-out.
    #[error("Session expired and could not be refreshed")]
    SessionExpired,

    /// A tenant or association already exists where a write expected none.
    /// Callers catch this and reuse the existing record.
    #[error("Tenant conflict: {0}")]
    TenantConflict(String),

    /// A directory write (tenant creation, association, subscription) failed.
    #[error("Directory write failed: {0}")]
    WriteFailed(String),

    /// A best-effort lookup could not be performed (e.g. insufficient
    /// privilege). The resolver degrades this to "not found".
    #[error("Lookup unavailable: {0}")]
    LookupUnavailable(String),

    /// A non-expired processing token already exists for this identity.
    #[error("Identity is already being processed")]
    AlreadyProcessing,

    /// A directory call exceeded the configured timeout.
    #[error("Directory call timed out after {0:?}")]
    DirectoryTimeout(Duration),

    /// Invariant violation inside the flow itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Create a tenant-conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::TenantConflict(msg.into())
    }

    /// Create a write-failure error
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create a lookup-unavailable error
    pub fn lookup_unavailable(msg: impl Into<String>) -> Self {
        Self::LookupUnavailable(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check whether this error is a conflict that callers should resolve by
    /// reusing the existing record
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TenantConflict(_))
    }
}
