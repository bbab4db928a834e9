use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token acquisition from {endpoint} failed: {reason}")]
    TokenAcquisitionFailed { endpoint: String, reason: String },

    #[error("Token acquisition from {endpoint} timed out after {seconds}s")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Invalid token configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
