//! Armado de la aplicación: fachada de órdenes, motor de ejecución, control
//! del cambio estructural y resolución de permisos sobre un mismo store.
//!
//! Sobre Postgres los eventos viajan por `PgBroker`, así un `execute` lanzado
//! desde la CLI llega a los observadores conectados a `serve`.

use std::sync::Arc;

use log::info;
use sqlflow_core::{Broker, InstanceCatalog, OrderStore, SqlFlow, StaticAuthorizer};
use sqlflow_engine::{ControlService, SocketRegistry, StrategyFactory};
use sqlflow_persistence::{PgBroker, PgInstanceCatalog, PgOrderStore, PgPermissionRepository, PgPool, PoolProvider};
use sqlflow_policies::{PermissionRepository, PermissionResolver};

use crate::config::AppConfig;
use crate::error::AppError;

pub type PgStore = PgOrderStore<PoolProvider>;

pub struct App<S: OrderStore> {
    pub flow: Arc<SqlFlow<S>>,
    pub control: ControlService<S>,
    pub permissions: PermissionResolver,
    pub broker: Arc<dyn Broker>,
}

pub fn load_authorizer(config: &AppConfig) -> Result<Arc<StaticAuthorizer>, AppError> {
    match &config.authz_file {
        Some(path) => {
            let authz = StaticAuthorizer::from_json_file(path)?;
            info!("bootstrap:authz_loaded file={}", path.display());
            Ok(Arc::new(authz))
        }
        None => Ok(Arc::new(StaticAuthorizer::default())),
    }
}

impl<S: OrderStore> App<S> {
    pub fn assemble(config: &AppConfig,
                    store: Arc<S>,
                    catalog: Arc<dyn InstanceCatalog>,
                    permissions: Arc<dyn PermissionRepository>,
                    broker: Arc<dyn Broker>)
                    -> Result<Self, AppError> {
        let authz = load_authorizer(config)?;
        let registry = Arc::new(SocketRegistry::new());
        let executor = StrategyFactory::mysql(config.engine.clone(), registry.clone(), broker.clone());
        let flow = SqlFlow::builder(store.clone(), Arc::new(executor), catalog).authorizer(authz.clone())
                                                                             .broker(broker.clone())
                                                                             .batch_policy(config.batch_policy)
                                                                             .build();
        let control = ControlService::new(store,
                                          registry,
                                          broker.clone(),
                                          config.engine.socket_dir.clone(),
                                          config.engine.control_timeout);
        Ok(Self { flow: Arc::new(flow),
                  control,
                  permissions: PermissionResolver::new(permissions, authz),
                  broker })
    }
}

impl App<PgStore> {
    /// Aplicación completa sobre Postgres. `database_url` abre la conexión
    /// de escucha del broker, que no sale del pool.
    pub fn from_pool(config: &AppConfig, database_url: &str, pool: PgPool) -> Result<Self, AppError> {
        let broker = Arc::new(PgBroker::start(database_url, pool.clone())?);
        let provider = PoolProvider { pool };
        Self::assemble(config,
                       Arc::new(PgOrderStore::new(provider.clone())),
                       Arc::new(PgInstanceCatalog::new(provider.clone())),
                       Arc::new(PgPermissionRepository::new(provider)),
                       broker)
    }
}
