//! Gestor de tareas: división de órdenes aprobadas y ejecución por task.
//!
//! Invariante central: en una orden hay a lo sumo una task en `Executing`.
//! Se garantiza reclamando la task dentro de `OrderStore::transact`, que
//! cambia task y orden a `Executing` en la misma escritura.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authz::Authorizer;
use crate::catalog::{InstanceCatalog, TargetDatabase};
use crate::errors::CoreError;
use crate::executor::{ExecutionFailure, ExecutionRequest, SqlExecutor};
use crate::model::{ExecuteResult, OpLog, Order, OrderProgress, Task, TaskProgress, TaskResult};
use crate::notify::Broker;
use crate::sql::{self, SqlSplitter};
use crate::store::{blocking, OrderStore, OrderTx};

/// Política ante la falla de una task dentro de una ejecución por lotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    #[default]
    ContinueOnError,
    StopOnError,
}

impl FromStr for BatchPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" | "continue_on_error" => Ok(BatchPolicy::ContinueOnError),
            "stop" | "stop_on_error" => Ok(BatchPolicy::StopOnError),
            other => Err(CoreError::Validation(format!("unknown batch policy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskManagerConfig {
    pub batch_policy: BatchPolicy,
}

/// Resumen de `execute_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks que no se pudieron reclamar durante el lote.
    pub skipped: usize,
    pub result: ExecuteResult,
    pub order_progress: OrderProgress,
}

/// Crea una task por sentencia, en orden de aparición. Idempotente: si la
/// orden ya tiene tasks no hace nada y devuelve 0.
pub fn split_into_tasks(tx: &mut OrderTx, splitter: &dyn SqlSplitter) -> Result<usize, CoreError> {
    if !tx.tasks.is_empty() {
        return Ok(0);
    }
    let statements = splitter.split(&tx.order.content);
    if statements.is_empty() {
        return Err(CoreError::Validation(format!("order {} has no statements to split", tx.order.id)));
    }
    let order_id = tx.order.id;
    let declared = tx.order.sql_kind;
    tx.tasks = statements.iter()
                         .enumerate()
                         .map(|(seq, stmt)| Task::new(order_id, seq as u32, stmt.as_str(), sql::task_kind(stmt, declared)))
                         .collect();
    Ok(tx.tasks.len())
}

/// Reclama una task para ejecución: valida precondiciones y marca task y orden
/// como `Executing` en la misma transacción.
pub fn claim_task(tx: &mut OrderTx, task_id: Uuid) -> Result<Task, CoreError> {
    if !tx.order.progress.is_executable() {
        return Err(CoreError::InvalidState(format!("order is {}, not approved", tx.order.progress)));
    }
    match tx.task(task_id)?.progress {
        TaskProgress::Completed => return Err(CoreError::InvalidState("task already completed".into())),
        TaskProgress::Executing => return Err(CoreError::InvalidState("task already running".into())),
        TaskProgress::Paused => return Err(CoreError::Busy("task is paused".into())),
        _ => {}
    }
    if let Some(running) = tx.executing_task() {
        return Err(CoreError::Busy(format!("task {} of this order is executing", running.id)));
    }
    let task = tx.task_mut(task_id)?;
    task.set_progress(TaskProgress::Executing);
    let claimed = task.clone();
    tx.order.progress = OrderProgress::Executing;
    tx.order.touch();
    Ok(claimed)
}

/// Registra el resultado de una task reclamada. La orden pasa a `Completed`
/// sólo cuando todas sus tasks lo están; ante una falla queda en `Executing`.
pub fn finish_task(tx: &mut OrderTx, task_id: Uuid, outcome: Result<TaskResult, TaskResult>) -> Result<OrderProgress, CoreError> {
    let task = tx.task_mut(task_id)?;
    let (progress, result) = match outcome {
        Ok(r) => (TaskProgress::Completed, r),
        Err(r) => (TaskProgress::Failed, r),
    };
    task.set_progress(progress);
    task.result = Some(result);
    if tx.all_completed() {
        tx.order.progress = OrderProgress::Completed;
    }
    tx.order.touch();
    Ok(tx.order.progress)
}

/// Ejecución desatendida de una orden completa (usada por el scheduler).
#[async_trait]
pub trait ScheduledExecution: Send + Sync {
    async fn execute_order(&self, order: &Order) -> Result<(), CoreError>;
}

pub struct TaskManager<S: OrderStore> {
    store: Arc<S>,
    authz: Arc<dyn Authorizer>,
    executor: Arc<dyn SqlExecutor>,
    catalog: Arc<dyn InstanceCatalog>,
    broker: Arc<dyn Broker>,
    splitter: Arc<dyn SqlSplitter>,
    config: TaskManagerConfig,
}

impl<S: OrderStore> TaskManager<S> {
    pub fn new(store: Arc<S>,
               authz: Arc<dyn Authorizer>,
               executor: Arc<dyn SqlExecutor>,
               catalog: Arc<dyn InstanceCatalog>,
               broker: Arc<dyn Broker>,
               splitter: Arc<dyn SqlSplitter>,
               config: TaskManagerConfig)
               -> Self {
        Self { store,
               authz,
               executor,
               catalog,
               broker,
               splitter,
               config }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn split(&self, order_id: Uuid) -> Result<usize, CoreError> {
        let created = self.store.transact(order_id, |tx| {
                                     if tx.order.progress == OrderProgress::Pending {
                                         return Err(CoreError::InvalidState("order is not approved yet".into()));
                                     }
                                     split_into_tasks(tx, self.splitter.as_ref())
                                 })?;
        if created > 0 {
            info!("tasks:split order={} created={}", order_id, created);
        }
        Ok(created)
    }

    fn authorize(&self, order: &Order, actor: &str) -> Result<(), CoreError> {
        if self.authz.is_administrator(actor) || order.allows_executor(actor) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!("{actor} is not an executor of order {}", order.id)))
        }
    }

    fn oplog(&self, actor: &str, order_id: Uuid, msg: String) {
        if let Err(e) = self.store.append_log(&OpLog::new(actor, order_id, msg)) {
            warn!("tasks:oplog_failed order={} err={}", order_id, e);
        }
    }

    async fn oplog_async(&self, actor: &str, order_id: Uuid, msg: String) {
        let log = OpLog::new(actor, order_id, msg);
        if let Err(e) = blocking(&self.store, move |s| s.append_log(&log)).await {
            warn!("tasks:oplog_failed order={} err={}", order_id, e);
        }
    }

    fn notify(&self, order_id: Uuid, msg: String) {
        self.broker.publish(&order_id.to_string(), msg);
    }

    async fn resolve_target(&self, instance_id: Uuid) -> Result<TargetDatabase, CoreError> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.resolve(instance_id))
            .await
            .map_err(|e| CoreError::Internal(format!("spawn_blocking failed: {e}")))?
    }

    async fn claim(&self, order_id: Uuid, task_id: Uuid) -> Result<Task, CoreError> {
        blocking(&self.store, move |s| s.transact(order_id, |tx| claim_task(tx, task_id))).await
    }

    /// Ejecuta una única task.
    pub async fn execute(&self, task_id: Uuid, actor: &str) -> Result<TaskResult, CoreError> {
        let order = blocking(&self.store, move |s| {
                        let task = s.get_task(task_id)?;
                        s.get_order(task.order_id)
                    }).await?;
        self.authorize(&order, actor)?;
        let claimed = self.claim(order.id, task_id).await?;
        self.run_claimed(&order, claimed, actor).await
    }

    async fn run_claimed(&self, order: &Order, task: Task, actor: &str) -> Result<TaskResult, CoreError> {
        info!("tasks:start order={} task={} seq={} actor={}", order.id, task.id, task.seq, actor);
        self.oplog_async(actor, order.id, format!("started task #{} ({})", task.seq + 1, task.sql_kind)).await;
        self.notify(order.id, format!("[task {}] started: {}", task.seq + 1, task.sql));

        let outcome = match self.resolve_target(order.instance_id).await {
            Ok(target) => {
                let request = ExecutionRequest { order_id: order.id,
                                                 task_id: task.id,
                                                 target,
                                                 schema: order.schema.clone(),
                                                 sql_kind: task.sql_kind,
                                                 sql: task.sql.clone(),
                                                 export_format: order.export_format };
                self.executor.execute(request).await
            }
            Err(e) => Err(ExecutionFailure::new(format!("resolve instance: {e}"))),
        };

        let (order_id, task_id) = (order.id, task.id);
        match outcome {
            Ok(result) => {
                let recorded = result.clone();
                let progress =
                    blocking(&self.store, move |s| s.transact(order_id, |tx| finish_task(tx, task_id, Ok(recorded.clone())))).await?;
                info!("tasks:done order={} task={} affected={} order_progress={}", order_id, task_id, result.affected_rows, progress);
                self.oplog_async(actor, order_id, format!("task #{} completed, {} row(s) affected", task.seq + 1, result.affected_rows))
                    .await;
                self.notify(order_id, format!("[task {}] completed: {} row(s) affected", task.seq + 1, result.affected_rows));
                Ok(result)
            }
            Err(failure) => {
                let message = failure.message.clone();
                let recorded = failure.result;
                if let Err(e) = blocking(&self.store, move |s| s.transact(order_id, |tx| finish_task(tx, task_id, Err(recorded.clone())))).await {
                    error!("tasks:record_failure_failed order={} task={} err={}", order_id, task_id, e);
                    return Err(e);
                }
                error!("tasks:failed order={} task={} err={}", order_id, task_id, message);
                self.oplog_async(actor, order_id, format!("task #{} failed: {}", task.seq + 1, message)).await;
                self.notify(order_id, format!("[task {}] failed: {}", task.seq + 1, message));
                Err(CoreError::Execution(message))
            }
        }
    }

    /// Ejecuta secuencialmente todas las tasks no completadas de la orden.
    ///
    /// Una task que no se puede reclamar a mitad del lote (pausada o con otra
    /// task de la orden corriendo) se salta, o corta el lote con
    /// `StopOnError`. Pase lo que pase con las tasks, la clasificación se
    /// persiste y el resumen se publica.
    pub async fn execute_all(&self, order_id: Uuid, actor: &str) -> Result<BatchReport, CoreError> {
        let order = blocking(&self.store, move |s| s.get_order(order_id)).await?;
        self.authorize(&order, actor)?;
        let pending: Vec<Uuid> = blocking(&self.store, move |s| {
                                     s.transact(order_id, |tx| {
                                          if !tx.order.progress.is_executable() {
                                              return Err(CoreError::InvalidState(format!("order is {}, not approved", tx.order.progress)));
                                          }
                                          if tx.tasks.iter().any(|t| matches!(t.progress, TaskProgress::Executing | TaskProgress::Paused)) {
                                              return Err(CoreError::Busy("order has an executing or paused task".into()));
                                          }
                                          Ok(tx.tasks.iter().filter(|t| t.progress != TaskProgress::Completed).map(|t| t.id).collect())
                                      })
                                 }).await?;
        info!("tasks:batch_start order={} pending={} policy={:?}", order_id, pending.len(), self.config.batch_policy);

        let stop_on_error = self.config.batch_policy == BatchPolicy::StopOnError;
        let (mut succeeded, mut failed) = (0usize, 0usize);
        let mut skipped: Vec<Uuid> = Vec::new();
        let mut aborted: Option<CoreError> = None;
        for task_id in pending {
            let claimed = match self.claim(order_id, task_id).await {
                Ok(task) => task,
                Err(e @ (CoreError::Busy(_) | CoreError::InvalidState(_))) => {
                    warn!("tasks:batch_skip order={} task={} err={}", order_id, task_id, e);
                    self.oplog_async(actor, order_id, format!("task {task_id} skipped by batch: {e}")).await;
                    skipped.push(task_id);
                    if stop_on_error {
                        warn!("tasks:batch_stopped order={} task={}", order_id, task_id);
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("tasks:batch_claim_failed order={} task={} err={}", order_id, task_id, e);
                    aborted = Some(e);
                    break;
                }
            };
            match self.run_claimed(&order, claimed, actor).await {
                Ok(_) => succeeded += 1,
                Err(CoreError::Execution(_)) => {
                    failed += 1;
                    if stop_on_error {
                        warn!("tasks:batch_stopped order={} task={}", order_id, task_id);
                        break;
                    }
                }
                Err(other) => {
                    failed += 1;
                    aborted = Some(other);
                    break;
                }
            }
        }

        let skipped_count = skipped.len();
        let (result, order_progress) = blocking(&self.store, move |s| {
                                           s.transact(order_id, |tx| {
                                                // una task saltada que otro terminó no cuenta como falla
                                                let unfinished = skipped.iter()
                                                                        .filter(|id| tx.task(**id).map_or(true, |t| t.progress != TaskProgress::Completed))
                                                                        .count();
                                                let result = ExecuteResult::classify(succeeded, failed + unfinished);
                                                tx.order.execute_result = Some(result);
                                                if tx.all_completed() && tx.order.progress.is_executable() {
                                                    tx.order.progress = OrderProgress::Completed;
                                                }
                                                tx.order.touch();
                                                Ok((result, tx.order.progress))
                                            })
                                       }).await?;
        let report = BatchReport { executed: succeeded + failed,
                                   succeeded,
                                   failed,
                                   skipped: skipped_count,
                                   result,
                                   order_progress };
        info!("tasks:batch_done order={} succeeded={} failed={} skipped={} result={}", order_id, succeeded, failed, skipped_count, result);
        let summary = format!("{result} ({succeeded} ok, {failed} failed, {skipped_count} skipped)");
        self.oplog_async(actor, order_id, format!("batch execution finished: {summary}")).await;
        self.notify(order_id, format!("[order] batch finished: {summary}"));
        match aborted {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Cambio administrativo del progreso de una task (pausar, reintentar).
    pub fn update_task_progress(&self, task_id: Uuid, actor: &str, progress: TaskProgress) -> Result<Task, CoreError> {
        if !self.authz.is_administrator(actor) {
            return Err(CoreError::Forbidden(format!("{actor} may not override task progress")));
        }
        let task = self.store.get_task(task_id)?;
        let updated = self.store.transact(task.order_id, |tx| {
                                     if tx.order.progress.is_terminal() {
                                         return Err(CoreError::InvalidState(format!("order is {}", tx.order.progress)));
                                     }
                                     if progress == TaskProgress::Executing {
                                         if let Some(running) = tx.executing_task().filter(|t| t.id != task_id) {
                                             return Err(CoreError::Busy(format!("task {} of this order is executing", running.id)));
                                         }
                                     }
                                     let t = tx.task_mut(task_id)?;
                                     t.set_progress(progress);
                                     let updated = t.clone();
                                     if progress == TaskProgress::Executing && tx.order.progress == OrderProgress::Approved {
                                         tx.order.progress = OrderProgress::Executing;
                                     }
                                     if tx.all_completed() && tx.order.progress.is_executable() {
                                         tx.order.progress = OrderProgress::Completed;
                                     }
                                     tx.order.touch();
                                     Ok(updated)
                                 })?;
        info!("tasks:progress_override task={} progress={} actor={}", task_id, progress, actor);
        self.oplog(actor, task.order_id, format!("task #{} set to {}", updated.seq + 1, progress));
        Ok(updated)
    }

    pub fn list_tasks(&self, order_id: Uuid) -> Result<Vec<Task>, CoreError> {
        self.store.list_tasks(order_id)
    }
}

#[async_trait]
impl<S: OrderStore> ScheduledExecution for TaskManager<S> {
    async fn execute_order(&self, order: &Order) -> Result<(), CoreError> {
        let report = self.execute_all(order.id, order.default_executor()).await?;
        info!("tasks:scheduled_run order={} result={}", order.id, report.result);
        Ok(())
    }
}
