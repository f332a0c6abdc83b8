//! Difusión de eventos por canal (id de orden por convención).
//!
//! Entrega best-effort, a lo sumo una vez: quien se suscribe tarde no ve
//! mensajes anteriores y un suscriptor lento pierde mensajes (`Lagged`) en
//! lugar de frenar al publicador.

use dashmap::DashMap;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, warn};
use tokio::sync::broadcast;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub trait Broker: Send + Sync {
    /// Publica y devuelve cuántos suscriptores recibieron el mensaje.
    fn publish(&self, channel: &str, message: String) -> usize;
    fn subscribe(&self, channel: &str) -> Subscription;
}

pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Siguiente mensaje; `None` cuando el canal se cerró.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("notify:lagged channel={} skipped={}", self.channel, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct InMemoryBroker {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { channels: DashMap::new(),
               capacity: capacity.max(1) }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Suscriptores vivos del canal en este proceso.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |tx| tx.receiver_count())
    }
}

impl Broker for InMemoryBroker {
    fn publish(&self, channel: &str, message: String) -> usize {
        let sent = match self.channels.get(channel) {
            Some(tx) => tx.send(message).ok(),
            None => return 0,
        };
        match sent {
            Some(n) => n,
            None => {
                // sin receptores vivos
                self.channels.remove_if(channel, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        let rx = self.channels
                     .entry(channel.to_string())
                     .or_insert_with(|| broadcast::channel(self.capacity).0)
                     .subscribe();
        Subscription { channel: channel.to_string(),
                       rx }
    }
}

/// Motivo de fin de un relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ObserverClosed,
    StreamEnded,
    SinkFailed,
}

/// Reenvía la suscripción hacia un observador.
///
/// Corre dos bucles a la vez: uno consume `incoming` sólo para detectar el
/// cierre del observador (los mensajes se descartan) y otro reenvía cada
/// mensaje del canal a `outgoing`. El primero que termina corta ambos y
/// cierra el sink.
pub async fn relay<O, I>(mut subscription: Subscription, mut outgoing: O, mut incoming: I) -> RelayEnd
    where O: Sink<String> + Unpin,
          I: Stream + Unpin
{
    let channel = subscription.channel.clone();
    let end = {
        let drain = async {
            while incoming.next().await.is_some() {}
            RelayEnd::ObserverClosed
        };
        let forward = async {
            loop {
                match subscription.recv().await {
                    Some(msg) => {
                        if outgoing.send(msg).await.is_err() {
                            return RelayEnd::SinkFailed;
                        }
                    }
                    None => return RelayEnd::StreamEnded,
                }
            }
        };
        tokio::select! {
            end = drain => end,
            end = forward => end,
        }
    };
    let _ = outgoing.close().await;
    debug!("notify:relay_end channel={} reason={:?}", channel, end);
    end
}
