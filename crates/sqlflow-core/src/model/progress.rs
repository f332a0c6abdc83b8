//! Estados del ciclo de vida.
//!
//! Orden: `Pending → {Approved, Rejected}`, `Approved → Executing → Completed`.
//! `Failed` sólo se alcanza por actualización administrativa y `Closed` por
//! cierre explícito. Los estados terminales no admiten más transiciones.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderProgress {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Closed,
}

wire_enum!(OrderProgress {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Executing => "executing",
    Completed => "completed",
    Failed => "failed",
    Closed => "closed",
});

impl OrderProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(self,
                 OrderProgress::Rejected | OrderProgress::Completed | OrderProgress::Failed | OrderProgress::Closed)
    }

    /// Estados desde los que se puede ejecutar una task.
    pub fn is_executable(&self) -> bool {
        matches!(self, OrderProgress::Approved | OrderProgress::Executing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskProgress {
    Pending,
    Executing,
    Completed,
    Failed,
    Paused,
}

wire_enum!(TaskProgress {
    Pending => "pending",
    Executing => "executing",
    Completed => "completed",
    Failed => "failed",
    Paused => "paused",
});

/// Estado de decisión de un aprobador (forma JSON `{user, status}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Pending,
    Pass,
    Reject,
}

wire_enum!(Decision {
    Pending => "pending",
    Pass => "pass",
    Reject => "reject",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_matches_serde() {
        for p in [OrderProgress::Pending, OrderProgress::Executing, OrderProgress::Closed] {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.as_str()));
            assert_eq!(p.as_str().parse::<OrderProgress>().unwrap(), p);
        }
        assert!("running".parse::<TaskProgress>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(OrderProgress::Rejected.is_terminal());
        assert!(OrderProgress::Closed.is_terminal());
        assert!(!OrderProgress::Executing.is_terminal());
        assert!(OrderProgress::Executing.is_executable());
        assert!(!OrderProgress::Pending.is_executable());
    }
}
