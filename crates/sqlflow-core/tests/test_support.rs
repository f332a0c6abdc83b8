//! Dobles de prueba compartidos por los tests de integración del core.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlflow_core::{ExecutionFailure, ExecutionRequest, InMemoryInstanceCatalog, InMemoryOrderStore, NewOrder, SqlExecutor, SqlFlow,
                   SqlKind, StaticAuthorizer, TargetDatabase, TaskResult};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Ejecutor que falla cuando la sentencia contiene alguno de los patrones.
#[derive(Default)]
pub struct ScriptedExecutor {
    fail_on: Vec<String>,
    executed: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn failing_on(patterns: &[&str]) -> Self {
        Self { fail_on: patterns.iter().map(|p| p.to_string()).collect(),
               ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskResult, ExecutionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(request.sql.clone());
        if self.fail_on.iter().any(|p| request.sql.contains(p.as_str())) {
            return Err(ExecutionFailure::with_log("scripted failure", format!("running {}", request.sql)));
        }
        Ok(TaskResult { affected_rows: 1,
                        execute_log: format!("ok: {}", request.sql),
                        ..Default::default() })
    }
}

/// Ejecutor que espera un permiso antes de terminar.
pub struct GatedExecutor {
    pub gate: Arc<Semaphore>,
}

#[async_trait]
impl SqlExecutor for GatedExecutor {
    async fn execute(&self, _request: ExecutionRequest) -> Result<TaskResult, ExecutionFailure> {
        let _permit = self.gate.acquire().await.map_err(|_| ExecutionFailure::new("gate closed"))?;
        Ok(TaskResult { affected_rows: 1,
                        ..Default::default() })
    }
}

pub const ADMIN: &str = "root";
pub const APPLICANT: &str = "alice";

pub fn authorizer() -> StaticAuthorizer {
    StaticAuthorizer::new().with_admin(ADMIN).with_roles(APPLICANT, &["dev"])
}

pub fn catalog() -> (Arc<InMemoryInstanceCatalog>, Uuid) {
    let catalog = InMemoryInstanceCatalog::new();
    let id = Uuid::new_v4();
    catalog.register(id,
                     TargetDatabase { host: "127.0.0.1".into(),
                                      port: 3306,
                                      user: "app".into(),
                                      password: "secret".into(),
                                      db_kind: Default::default() });
    (Arc::new(catalog), id)
}

pub fn new_order(instance_id: Uuid, content: &str, kind: SqlKind, approvers: &[&str]) -> NewOrder {
    NewOrder { title: "change".into(),
               applicant: APPLICANT.into(),
               sql_kind: Some(kind),
               environment: "prod".into(),
               instance_id,
               schema: "shop".into(),
               content: content.into(),
               approvers: approvers.iter().map(|a| a.to_string()).collect(),
               ..Default::default() }
}

pub fn flow_with(executor: Arc<dyn SqlExecutor>) -> (SqlFlow<InMemoryOrderStore>, Uuid) {
    let (catalog, instance) = catalog();
    let flow = SqlFlow::builder(Arc::new(InMemoryOrderStore::new()), executor, catalog).authorizer(Arc::new(authorizer()))
                                                                                      .build();
    (flow, instance)
}
