//! sqlflow-persistence
//!
//! Backend Postgres (Diesel + r2d2) de órdenes, permisos y catálogo de
//! instancias, con paridad de comportamiento respecto a los stores en memoria.
//!
//! Módulos:
//! - `pg`: implementaciones sobre Postgres, broker entre procesos y
//!   construcción del pool.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_pool, ConnectionProvider, PgBroker, PgInstanceCatalog, PgOrderStore, PgPermissionRepository,
             PgPool, PoolProvider};
