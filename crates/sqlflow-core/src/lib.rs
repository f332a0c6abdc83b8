//! sqlflow-core: ciclo de vida de órdenes de cambio SQL.
//!
//! Aprobación por consenso, división en tasks, ejecución con exclusión mutua
//! por orden, ejecución diferida y difusión de eventos. El motor de ejecución
//! real, la persistencia y la resolución de permisos viven en otros crates y
//! se conectan a través de los traits de este.
pub mod approval;
pub mod audit;
pub mod authz;
pub mod catalog;
pub mod errors;
pub mod executor;
pub mod model;
pub mod notify;
pub mod orders;
pub mod scheduler;
pub mod sql;
pub mod store;
pub mod tasks;
pub mod workflow;

pub use approval::{apply_decision, DecisionOutcome};
pub use audit::{AuditFinding, AuditLevel, AuditParams, PassThroughAuditor, SqlAuditor};
pub use authz::{Authorizer, StaticAuthorizer, ADMIN_ROLE};
pub use catalog::{InMemoryInstanceCatalog, InstanceCatalog, TargetDatabase};
pub use errors::{CoreError, ErrorClass};
pub use executor::{ExecutionFailure, ExecutionRequest, SqlExecutor};
pub use model::{Approver, DbKind, Decision, ExecuteResult, ExportFormat, NewOrder, OpLog, Order, OrderFilter, OrderProgress,
                SqlKind, Task, TaskProgress, TaskResult};
pub use notify::{relay, Broker, InMemoryBroker, RelayEnd, Subscription};
pub use orders::{DecideResult, OrderService};
pub use scheduler::{OneTimeSchedule, Registration, Scheduler};
pub use sql::{LexicalSplitter, SqlSplitter};
pub use store::{InMemoryOrderStore, OrderStore, OrderTx};
pub use tasks::{BatchPolicy, BatchReport, ScheduledExecution, TaskManager, TaskManagerConfig};
pub use workflow::{SqlFlow, SqlFlowBuilder};
