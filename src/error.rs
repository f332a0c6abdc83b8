//! Errores de la aplicación y su código de salida.

use sqlflow_core::{CoreError, ErrorClass};
use sqlflow_persistence::PersistenceError;
use sqlflow_policies::PolicyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// 2 configuración, 4 rechazo del cliente (validación, permisos, estado), 5 falla.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Core(e) => match e.class() {
                ErrorClass::Client | ErrorClass::Forbidden | ErrorClass::NotFound | ErrorClass::Conflict => 4,
                ErrorClass::Execution | ErrorClass::Internal => 5,
            },
            AppError::Policy(PolicyError::Storage(_)) => 5,
            AppError::Policy(_) => 4,
            AppError::Persistence(PersistenceError::Config(_)) => 2,
            AppError::Persistence(_) | AppError::Io(_) | AppError::Json(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_and_failures_exit_differently() {
        assert_eq!(AppError::from(CoreError::Busy("x".into())).exit_code(), 4);
        assert_eq!(AppError::from(CoreError::Execution("x".into())).exit_code(), 5);
        assert_eq!(AppError::from(PolicyError::NotFound("t".into())).exit_code(), 4);
        assert_eq!(AppError::from(PersistenceError::Config("DATABASE_URL".into())).exit_code(), 2);
    }
}
