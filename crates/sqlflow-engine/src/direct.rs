//! Estrategia directa: DML, consultas y exportaciones en una sola conexión.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use sqlflow_core::{ExecutionFailure, ExecutionRequest, ExportFormat, SqlKind, TaskResult};

use crate::connector::SqlConnector;
use crate::export::write_export;
use crate::factory::ExecutionStrategy;

pub struct DirectStrategy {
    connector: Arc<dyn SqlConnector>,
    export_dir: PathBuf,
    timeout: Duration,
}

impl DirectStrategy {
    pub fn new(connector: Arc<dyn SqlConnector>, export_dir: PathBuf, timeout: Duration) -> Self {
        Self { connector,
               export_dir,
               timeout }
    }

    async fn export(&self, request: &ExecutionRequest) -> Result<TaskResult, ExecutionFailure> {
        let format = request.export_format.unwrap_or(ExportFormat::Json);
        let data = self.connector.query(&request.target, &request.schema, &request.sql, self.timeout).await?;
        let path = write_export(&self.export_dir, request.order_id, request.task_id, format, &data).await?;
        info!("direct:export task={} rows={} file={}", request.task_id, data.rows.len(), path.display());
        Ok(TaskResult { affected_rows: data.rows.len() as u64,
                        execute_log: format!("exported {} row(s) as {}", data.rows.len(), format),
                        error: None,
                        export_file: Some(path.display().to_string()) })
    }
}

#[async_trait]
impl ExecutionStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<TaskResult, ExecutionFailure> {
        if request.sql_kind == SqlKind::Export {
            return self.export(request).await;
        }
        debug!("direct:execute task={} schema={}", request.task_id, request.schema);
        let affected = self.connector.execute(&request.target, &request.schema, &request.sql, self.timeout).await?;
        Ok(TaskResult { affected_rows: affected,
                        execute_log: format!("{affected} row(s) affected"),
                        error: None,
                        export_file: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::QueryRows;
    use crate::errors::EngineError;
    use serde_json::json;
    use sqlflow_core::{DbKind, TargetDatabase};
    use uuid::Uuid;

    struct FakeConnector;

    #[async_trait]
    impl SqlConnector for FakeConnector {
        async fn execute(&self, _: &TargetDatabase, _: &str, sql: &str, timeout: Duration) -> Result<u64, EngineError> {
            if sql.contains("boom") {
                return Err(EngineError::Timeout(timeout));
            }
            Ok(3)
        }

        async fn query(&self, _: &TargetDatabase, _: &str, _: &str, _: Duration) -> Result<QueryRows, EngineError> {
            Ok(QueryRows { columns: vec!["id".into()],
                           rows: vec![vec![json!(1)], vec![json!(2)]] })
        }
    }

    fn request(kind: SqlKind, sql: &str) -> ExecutionRequest {
        ExecutionRequest { order_id: Uuid::new_v4(),
                           task_id: Uuid::new_v4(),
                           target: TargetDatabase { host: "db".into(),
                                                    port: 3306,
                                                    user: "u".into(),
                                                    password: "p".into(),
                                                    db_kind: DbKind::MySQL },
                           schema: "shop".into(),
                           sql_kind: kind,
                           sql: sql.into(),
                           export_format: None }
    }

    #[tokio::test]
    async fn dml_reports_affected_rows() {
        let s = DirectStrategy::new(Arc::new(FakeConnector), PathBuf::from("/nonexistent"), Duration::from_secs(1));
        let res = s.run(&request(SqlKind::Dml, "UPDATE t SET a = 1")).await.unwrap();
        assert_eq!(res.affected_rows, 3);
        assert_eq!(res.execute_log, "3 row(s) affected");
    }

    #[tokio::test]
    async fn failure_carries_message_into_payload() {
        let s = DirectStrategy::new(Arc::new(FakeConnector), PathBuf::from("/nonexistent"), Duration::from_secs(1));
        let err = s.run(&request(SqlKind::Dml, "UPDATE boom")).await.unwrap_err();
        assert!(err.message.contains("timed out"));
        assert_eq!(err.result.error.as_deref(), Some(err.message.as_str()));
    }

    #[tokio::test]
    async fn export_defaults_to_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = DirectStrategy::new(Arc::new(FakeConnector), dir.path().to_path_buf(), Duration::from_secs(1));
        let req = request(SqlKind::Export, "SELECT id FROM t");
        let res = s.run(&req).await.unwrap();
        assert_eq!(res.affected_rows, 2);
        let file = res.export_file.unwrap();
        assert!(file.ends_with(&format!("{}.json", req.task_id)));
        assert!(std::path::Path::new(&file).exists());
    }
}
