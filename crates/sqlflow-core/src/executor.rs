//! Frontera con el motor de ejecución.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::TargetDatabase;
use crate::model::{ExportFormat, SqlKind, TaskResult};

/// Todo lo necesario para ejecutar una task contra su base destino.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub order_id: Uuid,
    pub task_id: Uuid,
    pub target: TargetDatabase,
    pub schema: String,
    pub sql_kind: SqlKind,
    pub sql: String,
    pub export_format: Option<ExportFormat>,
}

/// Falla de ejecución con el payload que debe quedar registrado en la task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub message: String,
    pub result: TaskResult,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self { result: TaskResult::failure(message.clone()),
               message }
    }

    /// Conserva el log parcial acumulado antes de la falla.
    pub fn with_log(message: impl Into<String>, execute_log: String) -> Self {
        let mut failure = Self::new(message);
        failure.result.execute_log = execute_log;
        failure
    }
}

/// Ejecuta una task. Nunca entra en pánico: los errores vuelven como
/// `ExecutionFailure` y el llamador decide la transición de estado.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskResult, ExecutionFailure>;
}
