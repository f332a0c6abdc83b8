//! Máquina de estados de la orden: envío, aprobación y transiciones administrativas.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{apply_decision, DecisionOutcome};
use crate::audit::{self, AuditParams, SqlAuditor};
use crate::authz::Authorizer;
use crate::errors::CoreError;
use crate::model::{Decision, ExportFormat, NewOrder, OpLog, Order, OrderFilter, OrderProgress, SqlKind};
use crate::sql::{self, SqlSplitter};
use crate::store::OrderStore;
use crate::tasks::split_into_tasks;

/// Resultado de `decide`.
#[derive(Debug, Clone)]
pub struct DecideResult {
    pub order: Order,
    pub outcome: DecisionOutcome,
    /// Tasks creadas por la división automática (0 salvo al aprobar).
    pub tasks_created: usize,
}

/// Transición administrativa permitida. Los estados terminales son finales y
/// el avance normal es monótono; `Rejected`, `Failed` y `Closed` se alcanzan
/// desde cualquier estado no terminal.
pub fn transition_allowed(from: OrderProgress, to: OrderProgress) -> bool {
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    match to {
        OrderProgress::Rejected | OrderProgress::Failed | OrderProgress::Closed => true,
        OrderProgress::Approved => from == OrderProgress::Pending,
        OrderProgress::Executing => from == OrderProgress::Approved,
        OrderProgress::Completed => from == OrderProgress::Executing,
        OrderProgress::Pending => false,
    }
}

pub struct OrderService<S: OrderStore> {
    store: Arc<S>,
    authz: Arc<dyn Authorizer>,
    auditor: Arc<dyn SqlAuditor>,
    splitter: Arc<dyn SqlSplitter>,
}

impl<S: OrderStore> OrderService<S> {
    pub fn new(store: Arc<S>, authz: Arc<dyn Authorizer>, auditor: Arc<dyn SqlAuditor>, splitter: Arc<dyn SqlSplitter>) -> Self {
        Self { store,
               authz,
               auditor,
               splitter }
    }

    fn oplog(&self, actor: &str, order_id: Uuid, msg: String) {
        if let Err(e) = self.store.append_log(&OpLog::new(actor, order_id, msg)) {
            warn!("orders:oplog_failed order={} err={}", order_id, e);
        }
    }

    /// Valida, audita y crea la orden en `Pending`.
    pub fn submit(&self, mut new: NewOrder) -> Result<Order, CoreError> {
        for (field, value) in [("title", &new.title), ("applicant", &new.applicant), ("schema", &new.schema), ("content", &new.content)] {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{field} is required")));
            }
        }
        if new.instance_id.is_nil() {
            return Err(CoreError::Validation("instance_id is required".into()));
        }
        let kind = new.sql_kind.ok_or_else(|| CoreError::Validation("sql_kind is required".into()))?;
        let statements = self.splitter.split(&new.content);
        sql::check_sql_type(&statements, kind)?;

        if kind == SqlKind::Export {
            new.export_format.get_or_insert(ExportFormat::Json);
        } else {
            let params = AuditParams { db_kind: new.db_kind,
                                       schema: new.schema.clone() };
            if let Some(findings) = audit::blocking(self.auditor.check(&new.content, kind, &params)) {
                debug!("orders:audit_rejected applicant={} findings={}", new.applicant, findings.len());
                return Err(CoreError::AuditRejected(findings));
            }
        }

        let order = Order::from_new(new);
        self.store.insert_order(&order)?;
        info!("orders:submit order={} applicant={} kind={} statements={}", order.id, order.applicant, order.sql_kind, statements.len());
        self.oplog(&order.applicant, order.id, format!("submitted order '{}'", order.title));
        Ok(order)
    }

    /// Registra la decisión de un aprobador. Al alcanzar `Approved` divide la
    /// orden en tasks dentro de la misma transacción.
    pub fn decide(&self, order_id: Uuid, actor: &str, verdict: Decision, comment: &str) -> Result<DecideResult, CoreError> {
        let is_admin = self.authz.is_administrator(actor);
        let (outcome, tasks_created, order) = self.store.transact(order_id, |tx| {
                                                             let outcome = apply_decision(&mut tx.order, actor, verdict, is_admin)?;
                                                             let created = match outcome {
                                                                 DecisionOutcome::Approved => split_into_tasks(tx, self.splitter.as_ref())?,
                                                                 _ => 0,
                                                             };
                                                             Ok((outcome, created, tx.order.clone()))
                                                         })?;
        let msg = match outcome {
            DecisionOutcome::Recorded { remaining } => format!("passed ({remaining} approval(s) remaining)"),
            DecisionOutcome::Approved => format!("approved, split into {tasks_created} task(s)"),
            DecisionOutcome::Rejected => "rejected".to_string(),
        };
        info!("orders:decide order={} actor={} verdict={} outcome={:?}", order_id, actor, verdict, outcome);
        let msg = if comment.trim().is_empty() { msg } else { format!("{msg}: {}", comment.trim()) };
        self.oplog(actor, order_id, msg);
        Ok(DecideResult { order,
                          outcome,
                          tasks_created })
    }

    /// Transición administrativa directa; siempre queda en la bitácora.
    pub fn update_progress(&self, order_id: Uuid, actor: &str, progress: OrderProgress) -> Result<Order, CoreError> {
        let order = self.store.transact(order_id, |tx| {
                                   let from = tx.order.progress;
                                   if !transition_allowed(from, progress) {
                                       return Err(CoreError::InvalidState(format!("cannot move order from {from} to {progress}")));
                                   }
                                   tx.order.progress = progress;
                                   tx.order.touch();
                                   Ok(tx.order.clone())
                               })?;
        info!("orders:progress order={} progress={} actor={}", order_id, progress, actor);
        self.oplog(actor, order_id, format!("progress set to {progress}"));
        Ok(order)
    }

    fn ensure_owner_or_admin(&self, order: &Order, actor: &str) -> Result<(), CoreError> {
        if order.applicant == actor || self.authz.is_administrator(actor) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!("{actor} does not own order {}", order.id)))
        }
    }

    /// Cierra una orden que no está en ejecución ni terminada.
    pub fn close(&self, order_id: Uuid, actor: &str, reason: &str) -> Result<Order, CoreError> {
        let order = self.store.get_order(order_id)?;
        self.ensure_owner_or_admin(&order, actor)?;
        let order = self.store.transact(order_id, |tx| {
                                   let from = tx.order.progress;
                                   if from.is_terminal() || from == OrderProgress::Executing {
                                       return Err(CoreError::InvalidState(format!("cannot close an order that is {from}")));
                                   }
                                   tx.order.progress = OrderProgress::Closed;
                                   tx.order.touch();
                                   Ok(tx.order.clone())
                               })?;
        info!("orders:close order={} actor={}", order_id, actor);
        self.oplog(actor, order_id, format!("closed: {}", reason.trim()));
        Ok(order)
    }

    /// Cambia (o quita) la hora programada mientras la orden esté `Pending` o `Approved`.
    pub fn update_schedule(&self, order_id: Uuid, actor: &str, at: Option<DateTime<Utc>>) -> Result<Order, CoreError> {
        let order = self.store.get_order(order_id)?;
        self.ensure_owner_or_admin(&order, actor)?;
        let order = self.store.transact(order_id, |tx| {
                                   if !matches!(tx.order.progress, OrderProgress::Pending | OrderProgress::Approved) {
                                       return Err(CoreError::InvalidState(format!("cannot reschedule an order that is {}", tx.order.progress)));
                                   }
                                   tx.order.schedule_time = at;
                                   tx.order.touch();
                                   Ok(tx.order.clone())
                               })?;
        let msg = match at {
            Some(t) => format!("schedule set to {}", t.to_rfc3339()),
            None => "schedule removed".to_string(),
        };
        info!("orders:schedule order={} at={:?}", order_id, at);
        self.oplog(actor, order_id, msg);
        Ok(order)
    }

    pub fn get_order(&self, id: Uuid) -> Result<Order, CoreError> {
        self.store.get_order(id)
    }

    pub fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, CoreError> {
        self.store.list_orders(filter)
    }

    pub fn list_logs(&self, order_id: Uuid) -> Result<Vec<OpLog>, CoreError> {
        self.store.list_logs(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        assert!(!transition_allowed(OrderProgress::Completed, OrderProgress::Executing));
        assert!(!transition_allowed(OrderProgress::Rejected, OrderProgress::Approved));
        assert!(transition_allowed(OrderProgress::Closed, OrderProgress::Closed));
    }

    #[test]
    fn failure_branches_reachable_from_any_live_state() {
        for from in [OrderProgress::Pending, OrderProgress::Approved, OrderProgress::Executing] {
            assert!(transition_allowed(from, OrderProgress::Failed));
            assert!(transition_allowed(from, OrderProgress::Rejected));
        }
        assert!(!transition_allowed(OrderProgress::Approved, OrderProgress::Pending));
        assert!(!transition_allowed(OrderProgress::Pending, OrderProgress::Completed));
    }
}
