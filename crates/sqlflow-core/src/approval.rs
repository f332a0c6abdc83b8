//! Regla de consenso de aprobación.
//!
//! Función pura sobre la orden; el servicio la aplica dentro de una
//! transacción del store, lo que serializa decisiones concurrentes.

use crate::errors::CoreError;
use crate::model::{Decision, Order, OrderProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Voto registrado; faltan `remaining` aprobadores listados.
    Recorded { remaining: usize },
    Approved,
    Rejected,
}

/// Aplica la decisión de `actor` sobre `order`.
///
/// Un administrador que no figura en una lista no vacía puede votar, pero su
/// voto no se agrega a la lista: la unanimidad se calcula sólo con los
/// aprobadores listados. Con lista vacía, el pase del administrador aprueba.
pub fn apply_decision(order: &mut Order, actor: &str, verdict: Decision, is_admin: bool) -> Result<DecisionOutcome, CoreError> {
    if verdict == Decision::Pending {
        return Err(CoreError::Validation("decision must be pass or reject".into()));
    }
    if order.progress != OrderProgress::Pending {
        return Err(CoreError::InvalidState(format!("order is {}, not pending", order.progress)));
    }
    let listed = order.approvers.iter().position(|a| a.user == actor);
    match listed {
        Some(idx) if order.approvers[idx].status != Decision::Pending => return Err(CoreError::AlreadyDecided),
        Some(idx) => order.approvers[idx].status = verdict,
        None if !is_admin => return Err(CoreError::Forbidden(format!("{actor} is not an approver of this order"))),
        None => {}
    }
    order.touch();

    if verdict == Decision::Reject {
        order.progress = OrderProgress::Rejected;
        return Ok(DecisionOutcome::Rejected);
    }
    let remaining = order.approvers.iter().filter(|a| a.status != Decision::Pass).count();
    if remaining == 0 {
        order.progress = OrderProgress::Approved;
        Ok(DecisionOutcome::Approved)
    } else {
        Ok(DecisionOutcome::Recorded { remaining })
    }
}
