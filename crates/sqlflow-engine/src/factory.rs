//! Selección de estrategia por tipo de sentencia.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use sqlflow_core::sql::table_from_alter;
use sqlflow_core::{Broker, ExecutionFailure, ExecutionRequest, SqlExecutor, SqlKind, TaskResult};

use crate::config::EngineConfig;
use crate::connector::MySqlConnector;
use crate::control::SocketRegistry;
use crate::direct::DirectStrategy;
use crate::structural::StructuralChangeStrategy;

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, request: &ExecutionRequest) -> Result<TaskResult, ExecutionFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Direct,
    Structural,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Direct => f.write_str("direct"),
            StrategyKind::Structural => f.write_str("structural"),
        }
    }
}

/// `ALTER TABLE` sobre motores con cambio en línea va por la herramienta
/// externa; todo lo demás (incluido `CREATE`/`DROP`) se ejecuta directo.
pub fn select_strategy(request: &ExecutionRequest) -> StrategyKind {
    let online = request.sql_kind == SqlKind::Ddl
                 && request.target.db_kind.supports_online_ddl()
                 && table_from_alter(&request.sql).is_some();
    if online {
        StrategyKind::Structural
    } else {
        StrategyKind::Direct
    }
}

pub struct StrategyFactory {
    direct: Arc<dyn ExecutionStrategy>,
    structural: Arc<dyn ExecutionStrategy>,
}

impl StrategyFactory {
    pub fn new(direct: Arc<dyn ExecutionStrategy>, structural: Arc<dyn ExecutionStrategy>) -> Self {
        Self { direct, structural }
    }

    /// Fábrica de producción: conector MySQL más la herramienta configurada.
    pub fn mysql(config: EngineConfig, registry: Arc<SocketRegistry>, broker: Arc<dyn Broker>) -> Self {
        let direct = DirectStrategy::new(Arc::new(MySqlConnector::new(config.connect_timeout)),
                                         config.export_dir.clone(),
                                         config.statement_timeout);
        let structural = StructuralChangeStrategy::new(config, registry, broker);
        Self::new(Arc::new(direct), Arc::new(structural))
    }

    pub fn strategy(&self, kind: StrategyKind) -> &Arc<dyn ExecutionStrategy> {
        match kind {
            StrategyKind::Direct => &self.direct,
            StrategyKind::Structural => &self.structural,
        }
    }
}

#[async_trait]
impl SqlExecutor for StrategyFactory {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskResult, ExecutionFailure> {
        let kind = select_strategy(&request);
        let strategy = self.strategy(kind);
        debug!("factory:select task={} strategy={}", request.task_id, strategy.name());
        strategy.run(&request).await
    }
}
