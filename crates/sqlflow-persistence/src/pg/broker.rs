//! Difusión de eventos entre procesos sobre `LISTEN`/`NOTIFY`.
//!
//! Todo mensaje publicado viaja por Postgres en el canal `sqlflow_events`
//! como `{"channel", "message"}` y vuelve a cada proceso que escucha,
//! incluido el que lo publicó. Un hilo dueño de una conexión propia (fuera
//! del pool) recibe las notificaciones y las reparte a los suscriptores
//! locales a través de un `InMemoryBroker`. Otro hilo envía los `NOTIFY`
//! con conexiones del pool, así `publish` nunca bloquea.
//!
//! Mantiene la semántica del broker en memoria: best-effort, sin historia
//! para suscriptores tardíos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use diesel::prelude::*;
use diesel::sql_types::Text;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sqlflow_core::{Broker, InMemoryBroker, Subscription};

use super::{with_retry, ConnectionProvider, PgPool, PoolProvider};
use crate::error::PersistenceError;

pub const EVENTS_CHANNEL: &str = "sqlflow_events";

/// Postgres rechaza payloads de 8000 bytes o más.
const MAX_PAYLOAD_BYTES: usize = 7900;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Envelope {
    channel: String,
    message: String,
}

/// Serializa el sobre recortando el mensaje hasta que entre en un `NOTIFY`.
fn encode(channel: &str, message: String) -> Result<String, serde_json::Error> {
    let mut env = Envelope { channel: channel.to_string(),
                             message };
    loop {
        let payload = serde_json::to_string(&env)?;
        if payload.len() <= MAX_PAYLOAD_BYTES || env.message.len() <= 3 {
            return Ok(payload);
        }
        let excess = payload.len() - MAX_PAYLOAD_BYTES;
        let mut cut = env.message.len().saturating_sub(excess + 3);
        while !env.message.is_char_boundary(cut) {
            cut -= 1;
        }
        env.message.truncate(cut);
        env.message.push_str("...");
    }
}

fn decode(payload: &str) -> Option<Envelope> {
    match serde_json::from_str(payload) {
        Ok(env) => Some(env),
        Err(e) => {
            warn!("broker:bad_payload err={}", e);
            None
        }
    }
}

fn listen(url: &str) -> Result<PgConnection, PersistenceError> {
    let mut conn = PgConnection::establish(url).map_err(|e| PersistenceError::TransientIo(format!("listener connect: {e}")))?;
    diesel::sql_query(format!("LISTEN {EVENTS_CHANNEL}")).execute(&mut conn)?;
    Ok(conn)
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let until = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) && Instant::now() < until {
        thread::sleep(POLL_INTERVAL);
    }
}

fn listen_loop(url: String, mut conn: PgConnection, local: Arc<InMemoryBroker>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        let mut lost = false;
        for received in conn.notifications_iter() {
            match received {
                Ok(n) => {
                    if let Some(env) = decode(&n.payload) {
                        local.publish(&env.channel, env.message);
                    }
                }
                Err(e) => {
                    warn!("broker:listen_lost err={}", e);
                    lost = true;
                    break;
                }
            }
        }
        if !lost {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        // reconexión hasta lograrlo o hasta que se pida parar
        loop {
            sleep_unless_stopped(&stop, RECONNECT_DELAY);
            if stop.load(Ordering::SeqCst) {
                return;
            }
            match listen(&url) {
                Ok(fresh) => {
                    info!("broker:listen_restored channel={}", EVENTS_CHANNEL);
                    conn = fresh;
                    break;
                }
                Err(e) => warn!("broker:reconnect_failed err={}", e),
            }
        }
    }
    debug!("broker:listener_stopped");
}

fn notify(provider: &PoolProvider, payload: &str) -> Result<(), PersistenceError> {
    let mut conn = provider.connection()?;
    diesel::sql_query("SELECT pg_notify($1, $2)").bind::<Text, _>(EVENTS_CHANNEL)
                                                 .bind::<Text, _>(payload)
                                                 .execute(&mut conn)?;
    Ok(())
}

fn publish_loop(provider: PoolProvider, outbox: mpsc::Receiver<String>) {
    for payload in outbox {
        if let Err(e) = with_retry(|| notify(&provider, &payload)) {
            warn!("broker:notify_failed bytes={} err={}", payload.len(), e);
        }
    }
    debug!("broker:publisher_stopped");
}

/// Broker compartido entre procesos (CLI, servidor) que usan la misma base.
pub struct PgBroker {
    local: Arc<InMemoryBroker>,
    outbox: Option<mpsc::Sender<String>>,
    publisher: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl PgBroker {
    /// Abre la conexión de escucha (fuera del pool) y arranca ambos hilos.
    /// Falla si no puede hacer `LISTEN`; los cortes posteriores se reintentan.
    pub fn start(database_url: &str, pool: PgPool) -> Result<Self, PersistenceError> {
        let conn = listen(database_url)?;
        let local = Arc::new(InMemoryBroker::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        // si falla el hilo de escucha, soltar `tx` también termina el publicador
        let provider = PoolProvider { pool };
        let publisher = thread::Builder::new().name("sqlflow-notify".into())
                                              .spawn(move || publish_loop(provider, rx))
                                              .map_err(|e| PersistenceError::TransientIo(format!("spawn publisher: {e}")))?;
        let listener = {
            let (url, local, stop) = (database_url.to_string(), local.clone(), stop.clone());
            thread::Builder::new().name("sqlflow-listen".into())
                                  .spawn(move || listen_loop(url, conn, local, stop))
                                  .map_err(|e| PersistenceError::TransientIo(format!("spawn listener: {e}")))?
        };
        info!("broker:listening channel={}", EVENTS_CHANNEL);
        Ok(Self { local,
                  outbox: Some(tx),
                  publisher: Some(publisher),
                  listener: Some(listener),
                  stop })
    }
}

impl Broker for PgBroker {
    /// Encola el `NOTIFY` y devuelve cuántos suscriptores de este proceso lo
    /// recibirán; los de otros procesos no se cuentan.
    fn publish(&self, channel: &str, message: String) -> usize {
        let payload = match encode(channel, message) {
            Ok(p) => p,
            Err(e) => {
                warn!("broker:encode_failed channel={} err={}", channel, e);
                return 0;
            }
        };
        if self.outbox.as_ref().is_some_and(|tx| tx.send(payload).is_ok()) {
            self.local.subscriber_count(channel)
        } else {
            warn!("broker:publisher_gone channel={}", channel);
            0
        }
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        self.local.subscribe(channel)
    }
}

impl Drop for PgBroker {
    /// Vacía la cola de `NOTIFY` pendientes antes de soltar los hilos, así un
    /// comando de una sola ejecución no pierde sus últimos eventos.
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.outbox.take());
        for handle in [self.publisher.take(), self.listener.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("broker:thread_panicked");
            }
        }
    }
}
