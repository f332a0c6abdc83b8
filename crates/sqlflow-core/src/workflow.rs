//! Fachada `SqlFlow`: une servicio de órdenes, gestor de tareas, scheduler
//! y broker, y mantiene los timers coherentes con cada transición.
//!
//! ```ignore
//! let flow = SqlFlow::builder(store, executor, catalog)
//!     .authorizer(authz)
//!     .batch_policy(BatchPolicy::StopOnError)
//!     .build();
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::approval::DecisionOutcome;
use crate::audit::{PassThroughAuditor, SqlAuditor};
use crate::authz::{Authorizer, StaticAuthorizer};
use crate::catalog::InstanceCatalog;
use crate::errors::CoreError;
use crate::executor::SqlExecutor;
use crate::model::{Decision, NewOrder, OpLog, Order, OrderFilter, OrderProgress, Task, TaskProgress, TaskResult};
use crate::notify::{Broker, InMemoryBroker, Subscription};
use crate::orders::{DecideResult, OrderService};
use crate::scheduler::{Registration, Scheduler};
use crate::sql::{LexicalSplitter, SqlSplitter};
use crate::store::OrderStore;
use crate::tasks::{BatchPolicy, BatchReport, TaskManager, TaskManagerConfig};

pub struct SqlFlow<S: OrderStore> {
    orders: OrderService<S>,
    tasks: Arc<TaskManager<S>>,
    scheduler: Scheduler<S>,
    broker: Arc<dyn Broker>,
}

/// Builder de `SqlFlow`. Store, ejecutor y catálogo son obligatorios; el resto
/// tiene valores por defecto (autorizador vacío, auditor permisivo, divisor
/// léxico y broker en memoria).
pub struct SqlFlowBuilder<S: OrderStore> {
    store: Arc<S>,
    executor: Arc<dyn SqlExecutor>,
    catalog: Arc<dyn InstanceCatalog>,
    authz: Arc<dyn Authorizer>,
    auditor: Arc<dyn SqlAuditor>,
    splitter: Arc<dyn SqlSplitter>,
    broker: Arc<dyn Broker>,
    config: TaskManagerConfig,
}

impl<S: OrderStore> SqlFlowBuilder<S> {
    pub fn authorizer(mut self, authz: Arc<dyn Authorizer>) -> Self {
        self.authz = authz;
        self
    }

    pub fn auditor(mut self, auditor: Arc<dyn SqlAuditor>) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn splitter(mut self, splitter: Arc<dyn SqlSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = broker;
        self
    }

    pub fn batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.config.batch_policy = policy;
        self
    }

    pub fn build(self) -> SqlFlow<S> {
        let orders = OrderService::new(self.store.clone(), self.authz.clone(), self.auditor, self.splitter.clone());
        let tasks = Arc::new(TaskManager::new(self.store.clone(),
                                              self.authz,
                                              self.executor,
                                              self.catalog,
                                              self.broker.clone(),
                                              self.splitter,
                                              self.config));
        let scheduler = Scheduler::new(self.store, tasks.clone());
        SqlFlow { orders,
                  tasks,
                  scheduler,
                  broker: self.broker }
    }
}

impl<S: OrderStore> SqlFlow<S> {
    pub fn builder(store: Arc<S>, executor: Arc<dyn SqlExecutor>, catalog: Arc<dyn InstanceCatalog>) -> SqlFlowBuilder<S> {
        SqlFlowBuilder { store,
                         executor,
                         catalog,
                         authz: Arc::new(StaticAuthorizer::default()),
                         auditor: Arc::new(PassThroughAuditor),
                         splitter: Arc::new(LexicalSplitter),
                         broker: Arc::new(InMemoryBroker::default()),
                         config: TaskManagerConfig::default() }
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn tasks(&self) -> &Arc<TaskManager<S>> {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn submit(&self, new: NewOrder) -> Result<Order, CoreError> {
        self.orders.submit(new)
    }

    /// Decide y, si la orden queda aprobada con hora programada, arma su timer.
    pub fn decide(&self, order_id: Uuid, actor: &str, verdict: Decision, comment: &str) -> Result<DecideResult, CoreError> {
        let res = self.orders.decide(order_id, actor, verdict, comment)?;
        match res.outcome {
            DecisionOutcome::Approved => {
                self.scheduler.register(&res.order);
            }
            DecisionOutcome::Rejected => {
                self.scheduler.cancel(order_id);
            }
            DecisionOutcome::Recorded { .. } => {}
        }
        Ok(res)
    }

    pub fn update_progress(&self, order_id: Uuid, actor: &str, progress: OrderProgress) -> Result<Order, CoreError> {
        let order = self.orders.update_progress(order_id, actor, progress)?;
        if order.progress.is_terminal() {
            self.scheduler.cancel(order_id);
        }
        Ok(order)
    }

    pub fn close(&self, order_id: Uuid, actor: &str, reason: &str) -> Result<Order, CoreError> {
        let order = self.orders.close(order_id, actor, reason)?;
        self.scheduler.cancel(order_id);
        Ok(order)
    }

    pub fn update_schedule(&self, order_id: Uuid, actor: &str, at: Option<DateTime<Utc>>) -> Result<(Order, Registration), CoreError> {
        let order = self.orders.update_schedule(order_id, actor, at)?;
        self.scheduler.cancel(order_id);
        let registration = if order.progress == OrderProgress::Approved {
            self.scheduler.register(&order)
        } else {
            Registration::NotScheduled
        };
        Ok((order, registration))
    }

    pub async fn execute(&self, task_id: Uuid, actor: &str) -> Result<TaskResult, CoreError> {
        self.tasks.execute(task_id, actor).await
    }

    pub async fn execute_all(&self, order_id: Uuid, actor: &str) -> Result<BatchReport, CoreError> {
        let report = self.tasks.execute_all(order_id, actor).await?;
        // una ejecución manual deja sin objeto al timer pendiente
        self.scheduler.cancel(order_id);
        Ok(report)
    }

    pub fn update_task_progress(&self, task_id: Uuid, actor: &str, progress: TaskProgress) -> Result<Task, CoreError> {
        self.tasks.update_task_progress(task_id, actor, progress)
    }

    pub fn reconcile(&self) -> Result<usize, CoreError> {
        self.scheduler.reconcile()
    }

    pub fn sweep(&self) -> Result<usize, CoreError> {
        self.scheduler.sweep()
    }

    /// Espera los disparos ya vencidos (p.ej. una recuperación lanzada por
    /// `decide`). Un proceso de vida corta lo llama antes de soltar el
    /// runtime para no dejar una task reclamada en `Executing`.
    pub async fn settle(&self) -> usize {
        self.scheduler.wait_due().await
    }

    pub fn get_order(&self, id: Uuid) -> Result<Order, CoreError> {
        self.orders.get_order(id)
    }

    pub fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, CoreError> {
        self.orders.list_orders(filter)
    }

    pub fn list_tasks(&self, order_id: Uuid) -> Result<Vec<Task>, CoreError> {
        self.tasks.list_tasks(order_id)
    }

    pub fn list_logs(&self, order_id: Uuid) -> Result<Vec<OpLog>, CoreError> {
        self.orders.list_logs(order_id)
    }

    pub fn subscribe(&self, order_id: Uuid) -> Subscription {
        self.broker.subscribe(&order_id.to_string())
    }
}
