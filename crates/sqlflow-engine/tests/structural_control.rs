use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlflow_core::{Broker, DbKind, ExecutionRequest, InMemoryBroker, InMemoryOrderStore, NewOrder, Order, OrderStore, SqlKind,
                   TargetDatabase};
use sqlflow_engine::{ControlService, EngineConfig, ExecutionStrategy, SocketRegistry, StructuralChangeStrategy};
use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use uuid::Uuid;

/// Herramienta falsa: imprime progreso por stdout y stderr, tarda un poco y
/// falla si la alteración menciona `fail_me`.
const FAKE_TOOL: &str = r#"#!/bin/sh
echo "Copy: 0/100 0.0%"
echo "Throttle check" >&2
sleep 0.5
echo "Copy: 100/100 100.0%"
case "$*" in
  *fail_me*) echo "FATAL column rejected" >&2; exit 3 ;;
esac
echo "Done"
"#;

/// Emite una línea que no es UTF-8 y sigue escribiendo después.
const BINARY_OUTPUT_TOOL: &str = r#"#!/bin/sh
printf 'row \377\n'
sleep 0.3
echo "Done"
exit 0
"#;

/// Falla si recibe la contraseña por argumentos; si no, muestra el archivo de `--conf`.
const CONF_READING_TOOL: &str = r#"#!/bin/sh
case "$*" in
  *--password*) exit 9 ;;
esac
for arg in "$@"; do
  case "$arg" in
    --conf=*) cat "${arg#--conf=}" ;;
  esac
done
"#;

fn install_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let bin = dir.join(name);
    std::fs::write(&bin, body).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

fn install_fake_tool(dir: &Path) -> PathBuf {
    install_tool(dir, "fake-ghost.sh", FAKE_TOOL)
}

fn config(dir: &Path) -> EngineConfig {
    EngineConfig { ghost_bin: install_fake_tool(dir),
                   socket_dir: dir.to_path_buf(),
                   export_dir: dir.join("exports"),
                   control_timeout: Duration::from_secs(2),
                   ..Default::default() }
}

fn request(order_id: Uuid, sql: &str) -> ExecutionRequest {
    ExecutionRequest { order_id,
                       task_id: Uuid::new_v4(),
                       target: TargetDatabase { host: "127.0.0.1".into(),
                                                port: 3306,
                                                user: "ghost".into(),
                                                password: "pw".into(),
                                                db_kind: DbKind::MySQL },
                       schema: "shop".into(),
                       sql_kind: SqlKind::Ddl,
                       sql: sql.into(),
                       export_format: None }
}

fn stored_order(store: &InMemoryOrderStore, content: &str) -> Order {
    let order = Order::from_new(NewOrder { title: "alter users".into(),
                                           applicant: "alice".into(),
                                           sql_kind: Some(SqlKind::Ddl),
                                           instance_id: Uuid::new_v4(),
                                           schema: "shop".into(),
                                           content: content.into(),
                                           ..Default::default() });
    store.insert_order(&order).unwrap();
    order
}

#[tokio::test]
async fn output_lines_are_streamed_and_collected() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let registry = Arc::new(SocketRegistry::new());
    let strategy = StructuralChangeStrategy::new(config(dir.path()), registry.clone(), broker.clone());
    let order_id = Uuid::new_v4();
    let mut sub = broker.subscribe(&order_id.to_string());

    let res = strategy.run(&request(order_id, "ALTER TABLE users ADD COLUMN age INT")).await.unwrap();
    assert!(res.execute_log.contains("Copy: 100/100"));
    assert!(res.execute_log.contains("Throttle check"));
    assert!(res.execute_log.contains("Done"));
    assert!(res.error.is_none());
    assert_eq!(registry.lookup(order_id), None);

    let first = sub.recv().await.unwrap();
    assert!(first == "Copy: 0/100 0.0%" || first == "Throttle check");
}

#[tokio::test]
async fn non_utf8_output_does_not_break_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.ghost_bin = install_tool(dir.path(), "binary-ghost.sh", BINARY_OUTPUT_TOOL);
    let broker = Arc::new(InMemoryBroker::new());
    let strategy = StructuralChangeStrategy::new(cfg, Arc::new(SocketRegistry::new()), broker.clone());
    let order_id = Uuid::new_v4();
    let mut sub = broker.subscribe(&order_id.to_string());

    let res = strategy.run(&request(order_id, "ALTER TABLE users ADD COLUMN age INT")).await.unwrap();
    assert!(res.execute_log.contains("row \u{FFFD}"));
    assert!(res.execute_log.contains("Done"));
    assert_eq!(sub.recv().await.as_deref(), Some("row \u{FFFD}"));
    assert_eq!(sub.recv().await.as_deref(), Some("Done"));
}

#[tokio::test]
async fn credentials_reach_the_tool_through_its_conf_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.ghost_bin = install_tool(dir.path(), "conf-ghost.sh", CONF_READING_TOOL);
    let strategy = StructuralChangeStrategy::new(cfg, Arc::new(SocketRegistry::new()), Arc::new(InMemoryBroker::new()));

    let res = strategy.run(&request(Uuid::new_v4(), "ALTER TABLE users ADD COLUMN age INT")).await.unwrap();
    assert!(res.execute_log.contains("[client]"));
    assert!(res.execute_log.contains("user=\"ghost\""));
    assert!(res.execute_log.contains("password=\"pw\""));
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap()
                                                          .filter_map(Result::ok)
                                                          .filter(|e| e.file_name().to_string_lossy().ends_with(".cnf"))
                                                          .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn failing_tool_keeps_partial_log() {
    let dir = tempfile::tempdir().unwrap();
    let strategy = StructuralChangeStrategy::new(config(dir.path()), Arc::new(SocketRegistry::new()), Arc::new(InMemoryBroker::new()));
    let err = strategy.run(&request(Uuid::new_v4(), "ALTER TABLE users ADD COLUMN fail_me INT")).await.unwrap_err();
    assert!(err.message.contains("exited unsuccessfully"));
    assert!(err.result.execute_log.contains("FATAL column rejected"));
    assert_eq!(err.result.error.as_deref(), Some(err.message.as_str()));
}

#[tokio::test]
async fn missing_binary_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.ghost_bin = dir.path().join("does-not-exist");
    let registry = Arc::new(SocketRegistry::new());
    let strategy = StructuralChangeStrategy::new(cfg, registry.clone(), Arc::new(InMemoryBroker::new()));
    let order_id = Uuid::new_v4();
    let err = strategy.run(&request(order_id, "ALTER TABLE users ADD COLUMN x INT")).await.unwrap_err();
    assert!(err.message.starts_with("spawn"));
    assert_eq!(registry.lookup(order_id), None);
}

#[tokio::test]
async fn control_reaches_running_change_through_registry() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = Arc::new(InMemoryOrderStore::new());
    let order = stored_order(&store, "ALTER TABLE users ADD COLUMN age INT");
    let broker = Arc::new(InMemoryBroker::new());
    let registry = Arc::new(SocketRegistry::new());
    let strategy = Arc::new(StructuralChangeStrategy::new(cfg.clone(), registry.clone(), broker.clone()));

    let req = request(order.id, &order.content);
    let running = {
        let strategy = strategy.clone();
        tokio::spawn(async move { strategy.run(&req).await })
    };

    let path = loop {
        if let Some(p) = registry.lookup(order.id) {
            break p;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    let listener = UnixListener::bind(&path).unwrap();
    let accept = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut line = String::new();
        stream.read_to_string(&mut line).await.unwrap();
        line
    });

    let control = ControlService::new(store.clone(), registry.clone(), broker.clone(), cfg.socket_dir.clone(), cfg.control_timeout);
    let msg = control.send(order.id, "root", "chunk-size", Some(250)).await.unwrap();
    assert!(msg.contains("chunk-size=250"));
    assert_eq!(accept.await.unwrap(), "chunk-size=250\n");

    running.await.unwrap().unwrap();
    assert!(store.list_logs(order.id).unwrap().iter().any(|l| l.msg.contains("chunk-size=250")));
}

#[tokio::test]
async fn control_reconstructs_path_from_order_content() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryOrderStore::new());
    let order = stored_order(&store, "UPDATE x SET a = 1; ALTER TABLE `shop`.`users` ADD INDEX idx_age (age);");
    let path = sqlflow_engine::socket_path(dir.path(), order.id, "shop", "users");
    let listener = UnixListener::bind(&path).unwrap();
    let accept = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut line = String::new();
        stream.read_to_string(&mut line).await.unwrap();
        line
    });

    let control = ControlService::new(store, Arc::new(SocketRegistry::new()), Arc::new(InMemoryBroker::new()), dir.path().to_path_buf(), Duration::from_secs(2));
    assert_eq!(control.resolve(order.id).await.unwrap(), path);
    control.send(order.id, "root", "throttle", None).await.unwrap();
    assert_eq!(accept.await.unwrap(), "throttle\n");
}

#[tokio::test]
async fn control_without_running_change_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryOrderStore::new());
    let order = stored_order(&store, "ALTER TABLE users ADD COLUMN age INT");
    let control = ControlService::new(store, Arc::new(SocketRegistry::new()), Arc::new(InMemoryBroker::new()), dir.path().to_path_buf(), Duration::from_secs(1));
    let err = control.send(order.id, "root", "panic", None).await.unwrap_err();
    assert_eq!(err, sqlflow_core::CoreError::NotFound("task not found or not running".into()));

    let err = control.send(order.id, "root", "chunk-size", Some(0)).await.unwrap_err();
    assert!(matches!(err, sqlflow_core::CoreError::Validation(_)));
}
