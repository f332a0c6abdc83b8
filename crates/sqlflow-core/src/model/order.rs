//! Orden de cambio SQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Decision, DbKind, ExportFormat, OrderProgress, SqlKind};

/// Entrada de la lista de aprobadores. Conserva la forma persistida
/// `{"user": "...", "status": "pending|pass|reject"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub user: String,
    #[serde(default)]
    pub status: Decision,
}

impl Approver {
    pub fn pending(user: impl Into<String>) -> Self {
        Self { user: user.into(),
               status: Decision::Pending }
    }
}

/// Clasificación agregada de una ejecución por lotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteResult {
    AllSucceeded,
    AllFailed,
    Partial,
    NothingToDo,
}

wire_enum!(ExecuteResult {
    AllSucceeded => "all_succeeded",
    AllFailed => "all_failed",
    Partial => "partial",
    NothingToDo => "nothing_to_do",
});

impl ExecuteResult {
    pub fn classify(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, 0) => ExecuteResult::NothingToDo,
            (_, 0) => ExecuteResult::AllSucceeded,
            (0, _) => ExecuteResult::AllFailed,
            _ => ExecuteResult::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub title: String,
    pub remark: String,
    pub applicant: String,
    pub db_kind: DbKind,
    pub sql_kind: SqlKind,
    pub environment: String,
    pub instance_id: Uuid,
    pub schema: String,
    pub content: String,
    pub approvers: Vec<Approver>,
    /// Lista de ejecutores permitidos; vacía significa "sin restricción".
    pub executors: Vec<String>,
    pub reviewers: Vec<String>,
    pub cc: Vec<String>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub export_format: Option<ExportFormat>,
    pub execute_result: Option<ExecuteResult>,
    pub progress: OrderProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Materializa una orden nueva en `Pending` con todos los aprobadores pendientes.
    pub fn from_new(new: NewOrder) -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4(),
               title: new.title,
               remark: new.remark,
               applicant: new.applicant,
               db_kind: new.db_kind,
               sql_kind: new.sql_kind.expect("sql_kind is validated before Order::from_new"),
               environment: new.environment,
               instance_id: new.instance_id,
               schema: new.schema,
               content: new.content,
               approvers: new.approvers.into_iter().map(Approver::pending).collect(),
               executors: new.executors,
               reviewers: new.reviewers,
               cc: new.cc,
               schedule_time: new.schedule_time,
               export_format: new.export_format,
               execute_result: None,
               progress: OrderProgress::Pending,
               created_at: now,
               updated_at: now }
    }

    pub fn approver(&self, user: &str) -> Option<&Approver> {
        self.approvers.iter().find(|a| a.user == user)
    }

    /// Identidad usada por ejecuciones desatendidas: primer ejecutor o, en su
    /// defecto, el solicitante.
    pub fn default_executor(&self) -> &str {
        self.executors.first().map(String::as_str).unwrap_or(&self.applicant)
    }

    pub fn allows_executor(&self, user: &str) -> bool {
        self.executors.is_empty() || self.executors.iter().any(|e| e == user)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Datos de envío de una orden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    pub title: String,
    #[serde(default)]
    pub remark: String,
    pub applicant: String,
    #[serde(default)]
    pub db_kind: DbKind,
    pub sql_kind: Option<SqlKind>,
    #[serde(default)]
    pub environment: String,
    pub instance_id: Uuid,
    pub schema: String,
    pub content: String,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub executors: Vec<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub export_format: Option<ExportFormat>,
}

/// Filtro de listado; los campos `None` no restringen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub applicant: Option<String>,
    pub progress: Option<OrderProgress>,
    pub sql_kind: Option<SqlKind>,
    pub environment: Option<String>,
    /// Subcadena del título, sin distinguir mayúsculas.
    pub title: Option<String>,
    /// Sólo órdenes con hora programada.
    #[serde(default)]
    pub scheduled_only: bool,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(a) = &self.applicant {
            if &order.applicant != a {
                return false;
            }
        }
        if self.progress.is_some_and(|p| p != order.progress) {
            return false;
        }
        if self.sql_kind.is_some_and(|k| k != order.sql_kind) {
            return false;
        }
        if let Some(env) = &self.environment {
            if &order.environment != env {
                return false;
            }
        }
        if let Some(t) = &self.title {
            if !order.title.to_lowercase().contains(&t.to_lowercase()) {
                return false;
            }
        }
        !(self.scheduled_only && order.schedule_time.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Order {
        Order::from_new(NewOrder { title: "Add Column".into(),
                                   applicant: "alice".into(),
                                   sql_kind: Some(SqlKind::Ddl),
                                   instance_id: Uuid::new_v4(),
                                   schema: "shop".into(),
                                   content: "ALTER TABLE t ADD COLUMN x INT".into(),
                                   approvers: vec!["bob".into()],
                                   ..Default::default() })
    }

    #[test]
    fn approvers_start_pending_and_serialize_with_user_status() {
        let o = sample();
        let json = serde_json::to_value(&o.approvers).unwrap();
        assert_eq!(json, serde_json::json!([{"user": "bob", "status": "pending"}]));
        assert_eq!(o.progress, OrderProgress::Pending);
    }

    #[test]
    fn executor_falls_back_to_applicant() {
        let mut o = sample();
        assert_eq!(o.default_executor(), "alice");
        assert!(o.allows_executor("anyone"));
        o.executors = vec!["ops".into()];
        assert_eq!(o.default_executor(), "ops");
        assert!(!o.allows_executor("anyone"));
    }

    #[test]
    fn classify_covers_all_outcomes() {
        assert_eq!(ExecuteResult::classify(0, 0), ExecuteResult::NothingToDo);
        assert_eq!(ExecuteResult::classify(3, 0), ExecuteResult::AllSucceeded);
        assert_eq!(ExecuteResult::classify(0, 2), ExecuteResult::AllFailed);
        assert_eq!(ExecuteResult::classify(1, 1), ExecuteResult::Partial);
    }

    #[test]
    fn filter_matches_title_case_insensitively() {
        let o = sample();
        let f = OrderFilter { title: Some("add col".into()), ..Default::default() };
        assert!(f.matches(&o));
        let f = OrderFilter { scheduled_only: true, ..Default::default() };
        assert!(!f.matches(&o));
    }
}
