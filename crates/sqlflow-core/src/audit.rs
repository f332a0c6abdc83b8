//! Contrato del colaborador de auditoría SQL.
//!
//! Las reglas son opacas; el core sólo consume la lista de hallazgos y
//! bloquea el envío si alguno supera el nivel `Info`.

use serde::{Deserialize, Serialize};

use crate::model::{DbKind, SqlKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub level: AuditLevel,
    pub message: String,
    #[serde(default)]
    pub fix_suggestion: String,
}

impl AuditFinding {
    pub fn new(level: AuditLevel, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self { level,
               message: message.into(),
               fix_suggestion: fix.into() }
    }

    pub fn error(message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self::new(AuditLevel::Error, message, fix)
    }

    pub fn blocks(&self) -> bool {
        self.level > AuditLevel::Info
    }
}

/// Parámetros adicionales de la auditoría.
#[derive(Debug, Clone, Default)]
pub struct AuditParams {
    pub db_kind: DbKind,
    pub schema: String,
}

pub trait SqlAuditor: Send + Sync {
    fn check(&self, sql: &str, kind: SqlKind, params: &AuditParams) -> Vec<AuditFinding>;
}

/// Auditor que no reporta nada.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughAuditor;

impl SqlAuditor for PassThroughAuditor {
    fn check(&self, _sql: &str, _kind: SqlKind, _params: &AuditParams) -> Vec<AuditFinding> {
        Vec::new()
    }
}

/// Filtra los hallazgos bloqueantes; `None` si no hay ninguno.
pub fn blocking(findings: Vec<AuditFinding>) -> Option<Vec<AuditFinding>> {
    findings.iter().any(AuditFinding::blocks).then_some(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_findings_do_not_block() {
        let infos = vec![AuditFinding::new(AuditLevel::Info, "consider index", "")];
        assert!(blocking(infos).is_none());
        let mixed = vec![AuditFinding::new(AuditLevel::Info, "ok", ""),
                         AuditFinding::new(AuditLevel::Warning, "no where clause", "add WHERE")];
        assert_eq!(blocking(mixed).map(|f| f.len()), Some(2));
    }
}
