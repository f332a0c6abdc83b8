//! Endpoint de eventos en tiempo real: `GET /ws/{channel}` suscribe al
//! observador al canal (id de orden) y le reenvía cada mensaje como texto.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{future, SinkExt, StreamExt};
use log::{info, warn};
use sqlflow_core::{relay, Broker, CoreError, OrderStore, SqlFlow};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::bootstrap::App;
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct ServerState {
    broker: Arc<dyn Broker>,
}

pub fn router(broker: Arc<dyn Broker>) -> Router {
    Router::new().route("/healthz", get(|| async { "ok" }))
                 .route("/ws/{channel}", get(ws_handler))
                 .with_state(ServerState { broker })
}

pub async fn ws_handler(State(state): State<ServerState>, Path(channel): Path<String>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state.broker, channel))
}

async fn observe(socket: WebSocket, broker: Arc<dyn Broker>, channel: String) {
    let subscription = broker.subscribe(&channel);
    info!("server:observer_connected channel={}", channel);
    let (sink, stream) = socket.split();
    let outgoing = sink.with(|text: String| future::ready(Ok::<Message, axum::Error>(Message::Text(text.into()))));
    let end = relay(subscription, outgoing, stream).await;
    info!("server:observer_disconnected channel={} reason={:?}", channel, end);
}

/// Pasada del scheduler (lee el store) fuera de los hilos del runtime.
async fn scheduler_pass<S, F>(flow: &Arc<SqlFlow<S>>, op: F) -> Result<usize, CoreError>
    where S: OrderStore,
          F: FnOnce(&SqlFlow<S>) -> Result<usize, CoreError> + Send + 'static
{
    let flow = flow.clone();
    tokio::task::spawn_blocking(move || op(&flow)).await
                                                  .map_err(|e| CoreError::Internal(format!("spawn_blocking failed: {e}")))?
}

/// Barrido periódico de órdenes programadas aprobadas desde otros procesos.
fn spawn_sweeper<S: OrderStore>(flow: Arc<SqlFlow<S>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period.max(Duration::from_secs(1)));
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Err(e) = scheduler_pass(&flow, |f| f.sweep()).await {
                warn!("server:sweep_failed err={}", e);
            }
        }
    })
}

/// Reconcilia timers, levanta el endpoint y corre hasta `shutdown`.
pub async fn serve<S, F>(app: &App<S>, config: &AppConfig, shutdown: F) -> Result<(), AppError>
    where S: OrderStore,
          F: Future<Output = ()> + Send + 'static
{
    let restored = scheduler_pass(&app.flow, |f| f.reconcile()).await?;
    info!("server:reconciled scheduled_orders={}", restored);
    let sweeper = spawn_sweeper(app.flow.clone(), config.sweep_interval);
    let listener = TcpListener::bind(&config.bind).await?;
    info!("server:listening addr={}", listener.local_addr()?);
    let res = axum::serve(listener, router(app.broker.clone())).with_graceful_shutdown(shutdown).await;
    sweeper.abort();
    res?;
    info!("server:stopped");
    Ok(())
}
