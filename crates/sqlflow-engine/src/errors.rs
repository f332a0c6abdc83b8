//! Errores del motor de ejecución.

use std::time::Duration;

use sqlflow_core::{CoreError, ExecutionFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("sql: {0}")]
    Sql(String),
    #[error("spawn {bin}: {reason}")]
    Spawn { bin: String, reason: String },
    #[error("process exited unsuccessfully ({0})")]
    ProcessExit(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid control command: {0}")]
    InvalidCommand(String),
    #[error("control channel: {0}")]
    Control(String),
    #[error("{0}")]
    NotFound(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(io) => EngineError::Connect(io.to_string()),
            sqlx::Error::PoolTimedOut => EngineError::Connect("pool timed out".into()),
            other => EngineError::Sql(other.to_string()),
        }
    }
}

impl From<EngineError> for ExecutionFailure {
    fn from(e: EngineError) -> Self {
        ExecutionFailure::new(e.to_string())
    }
}

impl From<EngineError> for CoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidCommand(m) => CoreError::Validation(m),
            EngineError::NotFound(m) => CoreError::NotFound(m),
            EngineError::Unsupported(m) => CoreError::Validation(m),
            EngineError::Io(_) | EngineError::Control(_) | EngineError::Timeout(_) => CoreError::Internal(e.to_string()),
            other => CoreError::Execution(other.to_string()),
        }
    }
}
