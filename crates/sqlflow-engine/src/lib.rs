//! sqlflow-engine: ejecución real de tasks contra la base destino.
//!
//! - `direct`: DML, consultas y exportaciones vía `sqlx`.
//! - `structural`: `ALTER TABLE` en línea mediante una herramienta externa.
//! - `control`: comandos al proceso en curso por socket UNIX.
pub mod config;
pub mod connector;
pub mod control;
pub mod direct;
pub mod errors;
pub mod export;
pub mod factory;
pub mod structural;

pub use config::EngineConfig;
pub use connector::{MySqlConnector, QueryRows, SqlConnector};
pub use control::{send_command, socket_path, ControlCommand, ControlService, SocketRegistry};
pub use direct::DirectStrategy;
pub use errors::EngineError;
pub use factory::{select_strategy, ExecutionStrategy, StrategyFactory, StrategyKind};
pub use structural::{ghost_args, write_client_conf, StructuralChangeStrategy};
