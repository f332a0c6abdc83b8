use sqlflow_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid permission: {0}")]
    Validation(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl From<PolicyError> for CoreError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::NotFound(m) => CoreError::NotFound(m),
            PolicyError::Validation(m) => CoreError::Validation(m),
            PolicyError::Storage(m) => CoreError::Internal(m),
        }
    }
}
