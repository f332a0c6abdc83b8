//! Protocolo de control del proceso de cambio estructural.
//!
//! Cada ejecución en curso expone un socket UNIX cuyo path se deriva de
//! (orden, esquema, tabla). Los comandos son una línea de texto sin respuesta:
//! `throttle`, `unthrottle`, `panic` y `chunk-size=N`.
//!
//! El path se registra en `SocketRegistry` al lanzar el proceso. Si no está
//! (por ejemplo tras reiniciar el servicio) se reconstruye desde el primer
//! `ALTER TABLE` de la orden.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{info, warn};
use sqlflow_core::sql::{table_from_alter, LexicalSplitter, SqlSplitter};
use sqlflow_core::store::blocking;
use sqlflow_core::{Broker, CoreError, OpLog, OrderStore, SqlKind};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use uuid::Uuid;

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Throttle,
    Unthrottle,
    Panic,
    ChunkSize(u32),
}

impl ControlCommand {
    /// Arma el comando desde la acción pedida. `chunk-size` exige un valor positivo.
    pub fn parse(action: &str, value: Option<i64>) -> Result<Self, EngineError> {
        match action.trim() {
            "throttle" => Ok(Self::Throttle),
            "unthrottle" => Ok(Self::Unthrottle),
            "panic" => Ok(Self::Panic),
            "chunk-size" => {
                let v = value.ok_or_else(|| EngineError::InvalidCommand("chunk-size requires a value".into()))?;
                match u32::try_from(v) {
                    Ok(n) if n > 0 => Ok(Self::ChunkSize(n)),
                    _ => Err(EngineError::InvalidCommand(format!("chunk-size must be greater than 0, got {v}"))),
                }
            }
            other => Err(EngineError::InvalidCommand(format!("unsupported action '{other}', expected throttle, unthrottle, panic or chunk-size"))),
        }
    }

    /// Línea que se escribe en el socket.
    pub fn wire(&self) -> String {
        match self {
            Self::Throttle => "throttle".into(),
            Self::Unthrottle => "unthrottle".into(),
            Self::Panic => "panic".into(),
            Self::ChunkSize(n) => format!("chunk-size={n}"),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Throttle => "structural change paused".into(),
            Self::Unthrottle => "structural change resumed".into(),
            Self::Panic => "structural change cancelled".into(),
            Self::ChunkSize(n) => format!("structural change rate adjusted: chunk-size={n}"),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}

impl FromStr for ControlCommand {
    type Err = EngineError;

    /// Acepta la forma de cable (`chunk-size=500`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('=') {
            Some((action, raw)) => {
                let value = raw.trim().parse::<i64>().map_err(|_| EngineError::InvalidCommand(format!("invalid value '{raw}'")))?;
                Self::parse(action, Some(value))
            }
            None => Self::parse(s, None),
        }
    }
}

/// `<dir>/gh-ost.<order>.<schema>.<table>.sock`
pub fn socket_path(dir: &Path, order_id: Uuid, schema: &str, table: &str) -> PathBuf {
    dir.join(format!("gh-ost.{order_id}.{schema}.{table}.sock"))
}

/// Paths de control de las ejecuciones vivas, por orden.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    paths: DashMap<Uuid, PathBuf>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, order_id: Uuid, path: PathBuf) {
        self.paths.insert(order_id, path);
    }

    pub fn lookup(&self, order_id: Uuid) -> Option<PathBuf> {
        self.paths.get(&order_id).map(|p| p.value().clone())
    }

    pub fn remove(&self, order_id: Uuid) -> Option<PathBuf> {
        self.paths.remove(&order_id).map(|(_, p)| p)
    }
}

/// Escribe una línea en el socket y cierra la escritura.
pub async fn send_command(path: &Path, command: ControlCommand, timeout: Duration) -> Result<(), EngineError> {
    let io = async {
        let mut stream = UnixStream::connect(path).await?;
        stream.write_all(format!("{}\n", command.wire()).as_bytes()).await?;
        stream.shutdown().await?;
        Ok::<(), std::io::Error>(())
    };
    tokio::time::timeout(timeout, io).await
                                     .map_err(|_| EngineError::Timeout(timeout))?
                                     .map_err(|e| EngineError::Control(format!("{}: {e}", path.display())))
}

pub struct ControlService<S: OrderStore> {
    store: Arc<S>,
    registry: Arc<SocketRegistry>,
    broker: Arc<dyn Broker>,
    socket_dir: PathBuf,
    timeout: Duration,
}

impl<S: OrderStore> ControlService<S> {
    pub fn new(store: Arc<S>, registry: Arc<SocketRegistry>, broker: Arc<dyn Broker>, socket_dir: PathBuf, timeout: Duration) -> Self {
        Self { store,
               registry,
               broker,
               socket_dir,
               timeout }
    }

    /// Path de control de la orden: primero el registro, luego la reconstrucción.
    pub async fn resolve(&self, order_id: Uuid) -> Result<PathBuf, CoreError> {
        if let Some(path) = self.registry.lookup(order_id) {
            return Ok(path);
        }
        warn!("control:registry_miss order={}, reconstructing from order", order_id);
        let order = blocking(&self.store, move |s| s.get_order(order_id)).await?;
        let table = (order.sql_kind == SqlKind::Ddl).then(|| {
                                                        LexicalSplitter.split(&order.content)
                                                                       .iter()
                                                                       .find_map(|s| table_from_alter(s))
                                                    })
                                                    .flatten();
        let path = table.map(|t| socket_path(&self.socket_dir, order_id, &order.schema, &t))
                        .filter(|p| p.exists());
        path.ok_or_else(|| CoreError::NotFound("task not found or not running".into()))
    }

    /// Envía un comando a la ejecución en curso de la orden y lo anuncia en su canal.
    pub async fn send(&self, order_id: Uuid, actor: &str, action: &str, value: Option<i64>) -> Result<String, CoreError> {
        let command = ControlCommand::parse(action, value)?;
        let path = self.resolve(order_id).await?;
        send_command(&path, command, self.timeout).await?;
        let message = command.describe();
        info!("control:sent order={} actor={} command={} socket={}", order_id, actor, command, path.display());
        self.broker.publish(&order_id.to_string(), format!("[control] {message} by {actor}"));
        let log = OpLog::new(actor, order_id, message.clone());
        if let Err(e) = blocking(&self.store, move |s| s.append_log(&log)).await {
            warn!("control:oplog_failed order={} err={}", order_id, e);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_must_be_positive() {
        assert_eq!(ControlCommand::parse("chunk-size", Some(500)).unwrap(), ControlCommand::ChunkSize(500));
        for bad in [Some(0), Some(-5), None] {
            assert!(matches!(ControlCommand::parse("chunk-size", bad), Err(EngineError::InvalidCommand(_))));
        }
        assert!("chunk-size=-5".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn wire_form_round_trips_through_from_str() {
        for cmd in [ControlCommand::Throttle, ControlCommand::Unthrottle, ControlCommand::Panic, ControlCommand::ChunkSize(42)] {
            assert_eq!(cmd.wire().parse::<ControlCommand>().unwrap(), cmd);
        }
        assert!(ControlCommand::parse("resume", None).is_err());
    }

    #[test]
    fn socket_path_is_deterministic() {
        let id = Uuid::nil();
        let p = socket_path(Path::new("/run/sqlflow"), id, "shop", "users");
        assert_eq!(p, PathBuf::from(format!("/run/sqlflow/gh-ost.{id}.shop.users.sock")));
    }

    #[test]
    fn registry_forgets_removed_entries() {
        let reg = SocketRegistry::new();
        let id = Uuid::new_v4();
        reg.register(id, PathBuf::from("/tmp/a.sock"));
        assert_eq!(reg.lookup(id), Some(PathBuf::from("/tmp/a.sock")));
        assert!(reg.remove(id).is_some());
        assert_eq!(reg.lookup(id), None);
    }
}
