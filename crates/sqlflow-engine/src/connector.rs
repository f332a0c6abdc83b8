//! Conexión a la base destino.
//!
//! `SqlConnector` abstrae la ejecución directa para que la estrategia pueda
//! probarse sin servidor. `MySqlConnector` es la implementación real sobre
//! `sqlx`; abre una conexión por sentencia y la cierra al terminar.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use sqlflow_core::TargetDatabase;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Executor, Row, ValueRef};

use crate::errors::EngineError;

/// Resultado tabular de una consulta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Ejecuta y devuelve filas afectadas.
    async fn execute(&self, target: &TargetDatabase, schema: &str, sql: &str, timeout: Duration) -> Result<u64, EngineError>;
    async fn query(&self, target: &TargetDatabase, schema: &str, sql: &str, timeout: Duration) -> Result<QueryRows, EngineError>;
}

#[derive(Debug, Clone)]
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, target: &TargetDatabase, schema: &str) -> Result<MySqlConnection, EngineError> {
        let opts = MySqlConnectOptions::new().host(&target.host)
                                             .port(target.port)
                                             .username(&target.user)
                                             .password(&target.password)
                                             .database(schema);
        debug!("connector:connect host={} port={} schema={}", target.host, target.port, schema);
        tokio::time::timeout(self.connect_timeout, MySqlConnection::connect_with(&opts)).await
                                                                                        .map_err(|_| EngineError::Timeout(self.connect_timeout))?
                                                                                        .map_err(|e| EngineError::Connect(e.to_string()))
    }
}

#[async_trait]
impl SqlConnector for MySqlConnector {
    async fn execute(&self, target: &TargetDatabase, schema: &str, sql: &str, timeout: Duration) -> Result<u64, EngineError> {
        let mut conn = self.connect(target, schema).await?;
        let res = tokio::time::timeout(timeout, Executor::execute(&mut conn, sqlx::raw_sql(sql))).await;
        let _ = conn.close().await;
        let done = res.map_err(|_| EngineError::Timeout(timeout))??;
        Ok(done.rows_affected())
    }

    async fn query(&self, target: &TargetDatabase, schema: &str, sql: &str, timeout: Duration) -> Result<QueryRows, EngineError> {
        let mut conn = self.connect(target, schema).await?;
        let res = tokio::time::timeout(timeout, Executor::fetch_all(&mut conn, sqlx::raw_sql(sql))).await;
        let _ = conn.close().await;
        let rows = res.map_err(|_| EngineError::Timeout(timeout))??;
        let columns = rows.first()
                          .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
                          .unwrap_or_default();
        let rows = rows.iter().map(|r| (0..r.len()).map(|i| cell(r, i)).collect()).collect();
        Ok(QueryRows { columns, rows })
    }
}

/// Decodifica una celda probando tipos de mayor a menor precisión; lo que no
/// encaja se lee como texto crudo.
fn cell(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return Value::String(v.to_string());
    }
    row.try_get_unchecked::<String, _>(idx).map(Value::String).unwrap_or(Value::Null)
}
