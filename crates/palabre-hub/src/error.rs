use palabre_shared::types::CallState;
use thiserror::Error;

use palabre_store::StoreError;

/// Errors surfaced by the delivery core.
///
/// Validation errors (`Forbidden`, `InvalidOperation`, `InvalidState`) are
/// returned synchronously and must not be retried by callers; they signal a
/// business-rule violation, not a transient failure.
#[derive(Error, Debug)]
pub enum HubError {
    /// Actor is not a participant / not authorized for the entity.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate direct conversation or duplicate non-terminal call session.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Illegal call state-machine transition.
    #[error("Invalid call transition: cannot {action} from {from:?}")]
    InvalidState {
        from: CallState,
        action: &'static str,
    },

    /// Operation not valid for the entity subtype (e.g. adding a
    /// participant to a direct conversation).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Referenced entity absent.
    #[error("Record not found")]
    NotFound,

    /// Underlying storage failure. Transient; callers may retry.
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for HubError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => HubError::NotFound,
            other => HubError::Store(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HubError>;
