use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SqlKind, TaskProgress};

/// Resultado serializado de la ejecución de una task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub affected_rows: u64,
    #[serde(default)]
    pub execute_log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_file: Option<String>,
}

impl TaskResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self { error: Some(message.into()),
               ..Default::default() }
    }
}

/// Una sentencia de una orden, rastreada de forma independiente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Posición en el texto original (0-based).
    pub seq: u32,
    pub sql: String,
    pub sql_kind: SqlKind,
    pub progress: TaskProgress,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(order_id: Uuid, seq: u32, sql: impl Into<String>, sql_kind: SqlKind) -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4(),
               order_id,
               seq,
               sql: sql.into(),
               sql_kind,
               progress: TaskProgress::Pending,
               result: None,
               created_at: now,
               updated_at: now }
    }

    pub fn set_progress(&mut self, progress: TaskProgress) {
        self.progress = progress;
        self.updated_at = Utc::now();
    }
}
