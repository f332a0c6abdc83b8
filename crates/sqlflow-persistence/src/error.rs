//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y luego a la
//! taxonomía del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use sqlflow_core::CoreError;
use sqlflow_policies::PolicyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("configuration: {0}")]
    Config(String),
    /// La lógica de dominio abortó la transacción.
    #[error(transparent)]
    Rejected(CoreError),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Unknown(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unknown(format!("payload decode: {e}"))
    }
}

impl From<PersistenceError> for CoreError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Rejected(inner) => inner,
            PersistenceError::NotFound => CoreError::NotFound("record not found".into()),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<PersistenceError> for PolicyError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::NotFound => PolicyError::NotFound("record not found".into()),
            PersistenceError::CheckViolation(m) => PolicyError::Validation(m),
            other => PolicyError::Storage(other.to_string()),
        }
    }
}
