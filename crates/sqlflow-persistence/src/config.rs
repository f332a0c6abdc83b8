//! Conexión a Postgres desde el entorno: `DATABASE_URL` más tamaños de pool
//! opcionales. El `.env` se carga una sola vez por proceso.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::PersistenceError;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    // sin .env no es error
    let _ = dotenv();
});

pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

fn pool_size(key: &str, raw: Option<String>, default: u32) -> Result<u32, PersistenceError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim()
                    .parse()
                    .map_err(|_| PersistenceError::Config(format!("{key} debe ser un entero, se recibió '{v}'"))),
    }
}

impl DbConfig {
    pub fn from_env() -> Result<Self, PersistenceError> {
        init_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PersistenceError>
        where F: Fn(&str) -> Option<String>
    {
        let url = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty())
                                        .ok_or_else(|| PersistenceError::Config("DATABASE_URL no definido".into()))?;
        Ok(Self { url,
                  min_connections: pool_size("DATABASE_MIN_CONNECTIONS", lookup("DATABASE_MIN_CONNECTIONS"), DEFAULT_MIN_CONNECTIONS)?,
                  max_connections: pool_size("DATABASE_MAX_CONNECTIONS", lookup("DATABASE_MAX_CONNECTIONS"), DEFAULT_MAX_CONNECTIONS)? })
    }
}

/// Carga temprana del `.env` para binarios que leen otras variables antes
/// de abrir el pool.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
