//! Errores del core.
//!
//! Taxonomía única que atraviesa máquina de estados, gestor de tareas,
//! scheduler y stores. Cada variante tiene una clase (`ErrorClass`) que la
//! capa de transporte usa para decidir cómo reportarla al cliente.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditFinding;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    /// La auditoría SQL devolvió hallazgos por encima de `Info`.
    #[error("sql audit rejected the submission ({} finding(s))", .0.len())]
    AuditRejected(Vec<AuditFinding>),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("approver already decided")]
    AlreadyDecided,
    #[error("busy: {0}")]
    Busy(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Error de la base destino o del subproceso; siempre queda registrado en la task.
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Clasificación gruesa para reporte (equivalente 4xx / 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Entrada inválida o precondición del cliente.
    Client,
    Forbidden,
    NotFound,
    /// Conflicto de exclusión mutua o de estado; reintentar más tarde puede funcionar.
    Conflict,
    /// Falla de la base destino / subproceso.
    Execution,
    Internal,
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Validation(_) | CoreError::AuditRejected(_) => ErrorClass::Client,
            CoreError::Forbidden(_) => ErrorClass::Forbidden,
            CoreError::NotFound(_) => ErrorClass::NotFound,
            CoreError::InvalidState(_) | CoreError::AlreadyDecided | CoreError::Busy(_) => ErrorClass::Conflict,
            CoreError::Execution(_) => ErrorClass::Execution,
            CoreError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound(format!("{what} {id}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("serde: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_invalid_state_are_conflicts() {
        assert_eq!(CoreError::Busy("x".into()).class(), ErrorClass::Conflict);
        assert_eq!(CoreError::InvalidState("x".into()).class(), ErrorClass::Conflict);
        assert_eq!(CoreError::AlreadyDecided.class(), ErrorClass::Conflict);
    }

    #[test]
    fn audit_rejection_reports_finding_count() {
        let err = CoreError::AuditRejected(vec![AuditFinding::error("missing primary key", "add a PK")]);
        assert_eq!(err.to_string(), "sql audit rejected the submission (1 finding(s))");
        assert_eq!(err.class(), ErrorClass::Client);
    }
}
