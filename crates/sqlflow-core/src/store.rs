//! Almacenamiento de órdenes, tasks y bitácora.
//!
//! El contrato clave es `transact`: carga la orden y sus tasks bajo bloqueo,
//! aplica la mutación y persiste todo junto sólo si la closure devuelve `Ok`.
//! Toda transición que toque orden y task a la vez (p.ej. reclamar una task)
//! pasa por aquí, de modo que el estado nunca queda a medio escribir.
//!
//! La closure es `FnMut` porque una implementación relacional puede
//! reintentarla ante conflictos de serialización.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{OpLog, Order, OrderFilter, Task, TaskProgress};

/// Vista transaccional de una orden y sus tasks (ordenadas por `seq`).
#[derive(Debug, Clone)]
pub struct OrderTx {
    pub order: Order,
    pub tasks: Vec<Task>,
}

impl OrderTx {
    pub fn task(&self, id: Uuid) -> Result<&Task, CoreError> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| CoreError::not_found("task", id))
    }

    pub fn task_mut(&mut self, id: Uuid) -> Result<&mut Task, CoreError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CoreError::not_found("task", id))
    }

    pub fn executing_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.progress == TaskProgress::Executing)
    }

    pub fn all_completed(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.progress == TaskProgress::Completed)
    }
}

pub trait OrderStore: Send + Sync + 'static {
    fn insert_order(&self, order: &Order) -> Result<(), CoreError>;
    fn get_order(&self, id: Uuid) -> Result<Order, CoreError>;
    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, CoreError>;
    fn get_task(&self, id: Uuid) -> Result<Task, CoreError>;
    /// Tasks de la orden en orden de división.
    fn list_tasks(&self, order_id: Uuid) -> Result<Vec<Task>, CoreError>;
    /// Lectura-modificación-escritura atómica sobre una orden y sus tasks.
    /// Las tasks nuevas agregadas a `OrderTx::tasks` se insertan.
    fn transact<T, F>(&self, order_id: Uuid, f: F) -> Result<T, CoreError>
        where F: FnMut(&mut OrderTx) -> Result<T, CoreError>;
    fn append_log(&self, log: &OpLog) -> Result<(), CoreError>;
    /// Bitácora de la orden, ascendente por tiempo.
    fn list_logs(&self, order_id: Uuid) -> Result<Vec<OpLog>, CoreError>;
}

impl<S: OrderStore> OrderStore for Arc<S> {
    fn insert_order(&self, order: &Order) -> Result<(), CoreError> {
        (**self).insert_order(order)
    }
    fn get_order(&self, id: Uuid) -> Result<Order, CoreError> {
        (**self).get_order(id)
    }
    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, CoreError> {
        (**self).list_orders(filter)
    }
    fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        (**self).get_task(id)
    }
    fn list_tasks(&self, order_id: Uuid) -> Result<Vec<Task>, CoreError> {
        (**self).list_tasks(order_id)
    }
    fn transact<T, F>(&self, order_id: Uuid, f: F) -> Result<T, CoreError>
        where F: FnMut(&mut OrderTx) -> Result<T, CoreError>
    {
        (**self).transact(order_id, f)
    }
    fn append_log(&self, log: &OpLog) -> Result<(), CoreError> {
        (**self).append_log(log)
    }
    fn list_logs(&self, order_id: Uuid) -> Result<Vec<OpLog>, CoreError> {
        (**self).list_logs(order_id)
    }
}

/// Corre una operación del store en el pool bloqueante de tokio.
///
/// Los stores son síncronos (Diesel, reintentos con `thread::sleep`); desde
/// código async se llaman siempre a través de esta función para no frenar
/// los hilos del runtime.
pub async fn blocking<S, T, F>(store: &Arc<S>, op: F) -> Result<T, CoreError>
    where S: OrderStore,
          T: Send + 'static,
          F: FnOnce(&S) -> Result<T, CoreError> + Send + 'static
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| CoreError::Internal(format!("spawn_blocking failed: {e}")))?
}

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    tasks: HashMap<Uuid, Task>,
    logs: Vec<OpLog>,
}

impl Inner {
    fn tasks_of(&self, order_id: Uuid) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().filter(|t| t.order_id == order_id).cloned().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }
}

/// Store en memoria. Un único mutex serializa todas las transacciones.
#[derive(Default)]
pub struct InMemoryOrderStore {
    inner: Mutex<Inner>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CoreError> {
        self.inner.lock().map_err(|_| CoreError::Internal("order store mutex poisoned".into()))
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert_order(&self, order: &Order) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        if inner.orders.contains_key(&order.id) {
            return Err(CoreError::Validation(format!("order {} already exists", order.id)));
        }
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn get_order(&self, id: Uuid) -> Result<Order, CoreError> {
        self.lock()?.orders.get(&id).cloned().ok_or_else(|| CoreError::not_found("order", id))
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, CoreError> {
        let inner = self.lock()?;
        let mut orders: Vec<Order> = inner.orders.values().filter(|o| filter.matches(o)).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        self.lock()?.tasks.get(&id).cloned().ok_or_else(|| CoreError::not_found("task", id))
    }

    fn list_tasks(&self, order_id: Uuid) -> Result<Vec<Task>, CoreError> {
        Ok(self.lock()?.tasks_of(order_id))
    }

    fn transact<T, F>(&self, order_id: Uuid, mut f: F) -> Result<T, CoreError>
        where F: FnMut(&mut OrderTx) -> Result<T, CoreError>
    {
        let mut inner = self.lock()?;
        let order = inner.orders.get(&order_id).cloned().ok_or_else(|| CoreError::not_found("order", order_id))?;
        let mut tx = OrderTx { order, tasks: inner.tasks_of(order_id) };
        let out = f(&mut tx)?;
        if let Some(stray) = tx.tasks.iter().find(|t| t.order_id != order_id) {
            return Err(CoreError::Internal(format!("task {} does not belong to order {order_id}", stray.id)));
        }
        for task in tx.tasks {
            inner.tasks.insert(task.id, task);
        }
        inner.orders.insert(order_id, tx.order);
        Ok(out)
    }

    fn append_log(&self, log: &OpLog) -> Result<(), CoreError> {
        self.lock()?.logs.push(log.clone());
        Ok(())
    }

    fn list_logs(&self, order_id: Uuid) -> Result<Vec<OpLog>, CoreError> {
        let inner = self.lock()?;
        let mut logs: Vec<OpLog> = inner.logs.iter().filter(|l| l.order_id == order_id).cloned().collect();
        logs.sort_by_key(|l| l.created_at);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewOrder, OrderProgress, SqlKind};

    fn order() -> Order {
        Order::from_new(NewOrder { title: "t".into(),
                                   applicant: "alice".into(),
                                   sql_kind: Some(SqlKind::Dml),
                                   instance_id: Uuid::new_v4(),
                                   schema: "s".into(),
                                   content: "UPDATE t SET a=1".into(),
                                   ..Default::default() })
    }

    #[test]
    fn failed_transaction_leaves_state_untouched() {
        let store = InMemoryOrderStore::new();
        let o = order();
        store.insert_order(&o).unwrap();
        let res: Result<(), CoreError> = store.transact(o.id, |tx| {
                                                  tx.order.progress = OrderProgress::Approved;
                                                  tx.tasks.push(Task::new(tx.order.id, 0, "UPDATE t SET a=1", SqlKind::Dml));
                                                  Err(CoreError::Busy("nope".into()))
                                              });
        assert!(res.is_err());
        assert_eq!(store.get_order(o.id).unwrap().progress, OrderProgress::Pending);
        assert!(store.list_tasks(o.id).unwrap().is_empty());
    }

    #[test]
    fn committed_transaction_inserts_tasks_in_seq_order() {
        let store = InMemoryOrderStore::new();
        let o = order();
        store.insert_order(&o).unwrap();
        store.transact(o.id, |tx| {
                 let id = tx.order.id;
                 tx.tasks.push(Task::new(id, 1, "b", SqlKind::Dml));
                 tx.tasks.push(Task::new(id, 0, "a", SqlKind::Dml));
                 Ok(())
             })
             .unwrap();
        let tasks = store.list_tasks(o.id).unwrap();
        assert_eq!(tasks.iter().map(|t| t.sql.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn missing_order_is_not_found() {
        let store = InMemoryOrderStore::new();
        let res = store.transact(Uuid::new_v4(), |_| Ok(()));
        assert!(matches!(res, Err(CoreError::NotFound(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_runs_off_the_runtime_thread() {
        let store = Arc::new(InMemoryOrderStore::new());
        let o = order();
        store.insert_order(&o).unwrap();
        let caller = std::thread::current().id();
        let (ran_on, got) = blocking(&store, move |s| Ok((std::thread::current().id(), s.get_order(o.id)?))).await
                                                                                                             .unwrap();
        assert_ne!(ran_on, caller);
        assert_eq!(got.id, o.id);

        let missing = blocking(&store, |s| s.get_order(Uuid::new_v4())).await;
        assert!(matches!(missing, Err(CoreError::NotFound(_))));
    }
}
