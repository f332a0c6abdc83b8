//! sqlflow: flujo de órdenes de cambio SQL
//!
//! Arma los crates del workspace en una aplicación: configuración desde el
//! entorno, store Postgres, motor de ejecución MySQL, control del cambio
//! estructural, endpoint de eventos y la línea de comandos.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;

pub use bootstrap::App;
pub use config::AppConfig;
pub use error::AppError;
