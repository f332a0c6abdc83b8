//! Interfaz de línea de comandos.
//!
//! `serve` levanta el endpoint de eventos y el barrido de órdenes
//! programadas; el resto de los subcomandos opera una vez sobre el store
//! compartido y escribe el resultado como JSON en stdout. Antes de volver,
//! un subcomando espera las ejecuciones de recuperación que haya disparado
//! (una aprobación con hora ya vencida), así el proceso no sale con una
//! task a medio ejecutar.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use sqlflow_core::{Decision, NewOrder, OrderFilter, OrderProgress, OrderStore};
use sqlflow_persistence::{build_pool, DbConfig};
use uuid::Uuid;

use crate::bootstrap::App;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::server;

#[derive(Debug, Parser)]
#[command(name = "sqlflow")]
#[command(author, version, about = "SQL change-order workflow", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Endpoint websocket de eventos y barrido de órdenes programadas.
    Serve,
    /// Envía una orden descrita en un archivo JSON.
    Submit {
        #[arg(long)]
        file: PathBuf,
    },
    /// Lista órdenes.
    List {
        #[arg(long)]
        applicant: Option<String>,
        #[arg(long)]
        progress: Option<OrderProgress>,
        #[arg(long)]
        scheduled: bool,
    },
    /// Aprueba o rechaza una orden.
    Decide {
        order: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        verdict: Decision,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Cierra una orden no terminal.
    Close {
        order: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Cambia (o quita, sin `--at`) la hora programada.
    Schedule {
        order: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Ejecuta una task.
    Execute {
        task: Uuid,
        #[arg(long)]
        actor: String,
    },
    /// Ejecuta todas las tasks pendientes de una orden.
    ExecuteAll {
        order: Uuid,
        #[arg(long)]
        actor: String,
    },
    /// Comando de control sobre el cambio estructural en curso.
    Control {
        order: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        action: String,
        #[arg(long, allow_negative_numbers = true)]
        value: Option<i64>,
    },
    /// Tasks de una orden.
    Tasks { order: Uuid },
    /// Bitácora de una orden.
    Logs { order: Uuid },
    /// Permisos efectivos de un usuario.
    Permissions { user: String },
    /// ¿Puede el usuario consultar el objeto?
    Authorize {
        user: String,
        #[arg(long)]
        instance: String,
        #[arg(long)]
        schema: String,
        #[arg(long)]
        table: Option<String>,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("cli:shutdown_requested");
    }
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let db = DbConfig::from_env()?;
    let pool = build_pool(&db.url, db.min_connections, db.max_connections)?;
    let app = App::from_pool(&config, &db.url, pool)?;
    dispatch(&app, &config, cli.command).await
}

/// Corre un subcomando sobre una aplicación ya armada.
pub async fn dispatch<S: OrderStore>(app: &App<S>, config: &AppConfig, command: Commands) -> Result<(), AppError> {
    let res = run_command(app, config, command).await;
    let waited = app.flow.settle().await;
    if waited > 0 {
        info!("cli:settled catch_up_runs={}", waited);
    }
    res
}

async fn run_command<S: OrderStore>(app: &App<S>, config: &AppConfig, command: Commands) -> Result<(), AppError> {
    let flow = &app.flow;
    match command {
        Commands::Serve => server::serve(&app, &config, shutdown_signal()).await?,
        Commands::Submit { file } => {
            let new: NewOrder = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            print_json(&flow.submit(new)?)?;
        }
        Commands::List { applicant, progress, scheduled } => {
            let filter = OrderFilter { applicant,
                                       progress,
                                       scheduled_only: scheduled,
                                       ..Default::default() };
            print_json(&flow.list_orders(&filter)?)?;
        }
        Commands::Decide { order, actor, verdict, comment } => {
            let res = flow.decide(order, &actor, verdict, &comment)?;
            info!("cli:decided order={} outcome={:?} tasks_created={}", order, res.outcome, res.tasks_created);
            print_json(&res.order)?;
        }
        Commands::Close { order, actor, reason } => print_json(&flow.close(order, &actor, &reason)?)?,
        Commands::Schedule { order, actor, at } => {
            let (updated, registration) = flow.update_schedule(order, &actor, at)?;
            info!("cli:rescheduled order={} registration={:?}", order, registration);
            print_json(&updated)?;
        }
        Commands::Execute { task, actor } => print_json(&flow.execute(task, &actor).await?)?,
        Commands::ExecuteAll { order, actor } => print_json(&flow.execute_all(order, &actor).await?)?,
        Commands::Control { order, actor, action, value } => {
            let message = app.control.send(order, &actor, &action, value).await?;
            print_json(&serde_json::json!({ "message": message }))?;
        }
        Commands::Tasks { order } => print_json(&flow.list_tasks(order)?)?,
        Commands::Logs { order } => print_json(&flow.list_logs(order)?)?,
        Commands::Permissions { user } => {
            let objects: Vec<_> = app.permissions.effective_permissions(&user)?.into_iter().collect();
            print_json(&objects)?;
        }
        Commands::Authorize { user, instance, schema, table } => {
            let allowed = app.permissions.authorize_query(&user, &instance, &schema, table.as_deref())?;
            print_json(&serde_json::json!({ "allowed": allowed }))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decide_parses_wire_verdicts() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["sqlflow", "decide", &id.to_string(), "--actor", "bob", "--verdict", "pass"]);
        match cli.command {
            Commands::Decide { order, actor, verdict, comment } => {
                assert_eq!(order, id);
                assert_eq!(actor, "bob");
                assert_eq!(verdict, Decision::Pass);
                assert!(comment.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["sqlflow", "decide", &id.to_string(), "--actor", "bob", "--verdict", "maybe"]).is_err());
    }

    #[test]
    fn control_value_accepts_negative_numbers() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["sqlflow", "control", &id.to_string(), "--actor", "ops", "--action", "chunk-size", "--value", "-5"]);
        match cli.command {
            Commands::Control { action, value, .. } => {
                assert_eq!(action, "chunk-size");
                assert_eq!(value, Some(-5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_filters_by_progress() {
        let cli = Cli::parse_from(["sqlflow", "list", "--progress", "approved", "--scheduled"]);
        match cli.command {
            Commands::List { progress, scheduled, applicant } => {
                assert_eq!(progress, Some(OrderProgress::Approved));
                assert!(scheduled);
                assert!(applicant.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
