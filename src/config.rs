//! Configuración central de la aplicación.
//!
//! Lee variables de entorno (tras cargar `.env` una sola vez) y arma la
//! configuración del motor. `from_lookup` recibe la fuente de variables para
//! poder probarla sin tocar el entorno del proceso.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sqlflow_core::BatchPolicy;
use sqlflow_engine::EngineConfig;

use crate::error::AppError;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Dirección del endpoint de eventos en tiempo real.
    pub bind: String,
    pub engine: EngineConfig,
    pub batch_policy: BatchPolicy,
    /// JSON `{"users": {...}, "admins": [...]}`; sin archivo no hay roles.
    pub authz_file: Option<PathBuf>,
    /// Período del barrido de órdenes programadas en `serve`.
    pub sweep_interval: Duration,
}

fn parse_secs(key: &str, raw: Option<String>, default: u64) -> Result<Duration, AppError> {
    match raw {
        None => Ok(Duration::from_secs(default)),
        Some(v) => v.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| AppError::Config(format!("{key} must be a number of seconds, got '{v}'"))),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        sqlflow_persistence::init_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
        where F: Fn(&str) -> Option<String>
    {
        let defaults = EngineConfig::default();
        let engine = EngineConfig { ghost_bin: lookup("SQLFLOW_GHOST_BIN").map(PathBuf::from).unwrap_or(defaults.ghost_bin),
                                    socket_dir: lookup("SQLFLOW_SOCKET_DIR").map(PathBuf::from).unwrap_or(defaults.socket_dir),
                                    export_dir: lookup("SQLFLOW_EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
                                    statement_timeout: parse_secs("SQLFLOW_STATEMENT_TIMEOUT_SECS",
                                                                  lookup("SQLFLOW_STATEMENT_TIMEOUT_SECS"),
                                                                  defaults.statement_timeout.as_secs())?,
                                    extra_ghost_args: lookup("SQLFLOW_GHOST_EXTRA_ARGS").map(|v| v.split_whitespace().map(String::from).collect())
                                                                                         .unwrap_or_default(),
                                    ..defaults };
        let batch_policy = match lookup("SQLFLOW_BATCH_POLICY") {
            Some(v) => v.parse::<BatchPolicy>().map_err(|e| AppError::Config(e.to_string()))?,
            None => BatchPolicy::default(),
        };
        Ok(Self { bind: lookup("SQLFLOW_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
                  engine,
                  batch_policy,
                  authz_file: lookup("SQLFLOW_AUTHZ_FILE").map(PathBuf::from),
                  sweep_interval: parse_secs("SQLFLOW_SWEEP_SECS", lookup("SQLFLOW_SWEEP_SECS"), 60)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind, DEFAULT_BIND);
        assert_eq!(cfg.batch_policy, BatchPolicy::ContinueOnError);
        assert_eq!(cfg.engine.statement_timeout, Duration::from_secs(600));
        assert_eq!(cfg.engine.ghost_bin, PathBuf::from("gh-ost"));
        assert!(cfg.authz_file.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[("SQLFLOW_BATCH_POLICY", "stop"),
                                                  ("SQLFLOW_STATEMENT_TIMEOUT_SECS", "30"),
                                                  ("SQLFLOW_SOCKET_DIR", "/run/sqlflow"),
                                                  ("SQLFLOW_GHOST_EXTRA_ARGS", "--max-lag-millis=1500 --cut-over=default")])).unwrap();
        assert_eq!(cfg.batch_policy, BatchPolicy::StopOnError);
        assert_eq!(cfg.engine.statement_timeout, Duration::from_secs(30));
        assert_eq!(cfg.engine.socket_dir, PathBuf::from("/run/sqlflow"));
        assert_eq!(cfg.engine.extra_ghost_args.len(), 2);
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        assert!(matches!(AppConfig::from_lookup(lookup(&[("SQLFLOW_BATCH_POLICY", "sometimes")])), Err(AppError::Config(_))));
        assert!(matches!(AppConfig::from_lookup(lookup(&[("SQLFLOW_SWEEP_SECS", "soon")])), Err(AppError::Config(_))));
    }
}
