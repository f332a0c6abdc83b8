//! Estrategia de cambio estructural en línea.
//!
//! Lanza la herramienta externa como subproceso con un socket de control por
//! orden, reenvía cada línea de su salida al canal de la orden y espera su
//! salida. El socket queda registrado mientras el proceso vive, así que
//! `ControlService` puede pausarlo o cancelarlo desde otra petición.
//!
//! Las credenciales viajan en un archivo `[client]` temporal (modo 0600) que
//! se pasa con `--conf` y se borra al terminar; nunca en la línea de comando.
//! La salida se lee en bytes: una línea que no es UTF-8 se reemplaza con
//! pérdida pero la tubería se sigue drenando hasta el final.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use sqlflow_core::sql::{alter_clause, table_from_alter};
use sqlflow_core::{Broker, ExecutionFailure, ExecutionRequest, TargetDatabase, TaskResult};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::control::{socket_path, SocketRegistry};
use crate::errors::EngineError;
use crate::factory::ExecutionStrategy;

fn conf_value(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Escribe el archivo de credenciales que lee la herramienta con `--conf`.
/// El archivo se borra cuando se suelta el `NamedTempFile`.
pub fn write_client_conf(dir: &Path, target: &TargetDatabase) -> Result<NamedTempFile, EngineError> {
    let mut file = tempfile::Builder::new().prefix("gh-ost-")
                                           .suffix(".cnf")
                                           .tempfile_in(dir)?;
    writeln!(file, "[client]")?;
    writeln!(file, "user={}", conf_value(&target.user))?;
    writeln!(file, "password={}", conf_value(&target.password))?;
    file.flush()?;
    Ok(file)
}

/// Argumentos de línea de comando para una sentencia `ALTER TABLE`. El
/// usuario y la contraseña van en `conf` (ver `write_client_conf`).
pub fn ghost_args(config: &EngineConfig, request: &ExecutionRequest, conf: &Path) -> Result<Vec<String>, EngineError> {
    let table = table_from_alter(&request.sql).ok_or_else(|| EngineError::Unsupported("not an ALTER TABLE statement".into()))?;
    let clause = alter_clause(&request.sql).ok_or_else(|| EngineError::Unsupported("ALTER TABLE without alteration clause".into()))?;
    let socket = socket_path(&config.socket_dir, request.order_id, &request.schema, &table);
    let t = &request.target;
    let mut args = vec![format!("--host={}", t.host),
                        format!("--port={}", t.port),
                        format!("--conf={}", conf.display()),
                        format!("--database={}", request.schema),
                        format!("--table={table}"),
                        format!("--alter={clause}"),
                        format!("--serve-socket-file={}", socket.display()),
                        format!("--chunk-size={}", config.chunk_size),
                        "--allow-on-master".to_string(),
                        "--execute".to_string()];
    args.extend(config.extra_ghost_args.iter().cloned());
    Ok(args)
}

fn forward_lines<R>(reader: R, stream: &'static str, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
    where R: AsyncRead + Unpin + Send + 'static
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    // sin receptor se sigue drenando para no cortar la tubería del hijo
                    let _ = tx.send(line.trim_end_matches(['\n', '\r']).to_string());
                }
                Err(e) => {
                    warn!("structural:read_failed stream={} err={}", stream, e);
                    break;
                }
            }
        }
    })
}

pub struct StructuralChangeStrategy {
    config: EngineConfig,
    registry: Arc<SocketRegistry>,
    broker: Arc<dyn Broker>,
}

impl StructuralChangeStrategy {
    pub fn new(config: EngineConfig, registry: Arc<SocketRegistry>, broker: Arc<dyn Broker>) -> Self {
        Self { config,
               registry,
               broker }
    }

    async fn spawn_and_wait(&self, request: &ExecutionRequest, args: Vec<String>) -> Result<TaskResult, ExecutionFailure> {
        let bin = self.config.ghost_bin.display().to_string();
        let mut child = Command::new(&self.config.ghost_bin).args(&args)
                                                            .stdin(Stdio::null())
                                                            .stdout(Stdio::piped())
                                                            .stderr(Stdio::piped())
                                                            .kill_on_drop(true)
                                                            .spawn()
                                                            .map_err(|e| EngineError::Spawn { bin: bin.clone(),
                                                                                              reason: e.to_string() })?;
        info!("structural:spawned order={} task={} pid={:?}", request.order_id, request.task_id, child.id());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, "stdout", tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, "stderr", tx.clone()));
        }
        drop(tx);

        let channel = request.order_id.to_string();
        let mut log = String::new();
        while let Some(line) = rx.recv().await {
            self.broker.publish(&channel, line.clone());
            log.push_str(&line);
            log.push('\n');
        }
        for reader in readers {
            let _ = reader.await;
        }

        let status = child.wait().await.map_err(|e| ExecutionFailure::with_log(format!("wait {bin}: {e}"), log.clone()))?;
        if status.success() {
            info!("structural:finished order={} task={}", request.order_id, request.task_id);
            Ok(TaskResult { affected_rows: 0,
                            execute_log: log,
                            error: None,
                            export_file: None })
        } else {
            let msg = EngineError::ProcessExit(status.to_string()).to_string();
            error!("structural:failed order={} task={} status={}", request.order_id, request.task_id, status);
            Err(ExecutionFailure::with_log(msg, log))
        }
    }
}

#[async_trait]
impl ExecutionStrategy for StructuralChangeStrategy {
    fn name(&self) -> &'static str {
        "structural"
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<TaskResult, ExecutionFailure> {
        let conf = write_client_conf(&self.config.socket_dir, &request.target)?;
        let args = ghost_args(&self.config, request, conf.path())?;
        let table = table_from_alter(&request.sql).unwrap_or_default();
        let socket = socket_path(&self.config.socket_dir, request.order_id, &request.schema, &table);
        self.registry.register(request.order_id, socket);
        let res = self.spawn_and_wait(request, args).await;
        self.registry.remove(request.order_id);
        drop(conf);
        res
    }
}
