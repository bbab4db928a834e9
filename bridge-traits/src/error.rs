use thiserror::Error;

/// Errors surfaced at the collaborator boundary.
///
/// The first five variants classify the outcome of a registry, hub or staging
/// call so callers can decide between retrying, treating the call as an
/// idempotent no-op, or failing permanently.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Job quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same call may succeed.
    ///
    /// IO errors count as transient; `OperationFailed` does not, since it is
    /// mostly raised for malformed payloads.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transient(_) | BridgeError::Io(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BridgeError::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BridgeError::Transient("503".into()).is_transient());
        assert!(BridgeError::Io(std::io::Error::other("reset")).is_transient());
        assert!(!BridgeError::Permanent("400".into()).is_transient());
        assert!(!BridgeError::QuotaExceeded("jobs".into()).is_transient());
        assert!(BridgeError::NotFound("dev-1".into()).is_not_found());
        assert!(BridgeError::AlreadyExists("dev-1".into()).is_already_exists());
    }
}
