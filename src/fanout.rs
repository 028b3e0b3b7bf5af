//! Live fanout of accepted readings and heartbeats.
//!
//! Subscribers connect over TCP and receive one JSON message per line:
//!
//! ```text
//! {"type":"reading","data":{"address":"fd00::1","sequence":7,...}}
//! {"type":"heartbeat","data":"gateway alive"}
//! ```
//!
//! Publishing never blocks ingestion. Nobody listening means the message is dropped, and
//! a subscriber that falls behind skips what it missed.

use crate::error::GatewayResult;
use crate::packet::{fields_to_json, SensorPacket};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Message delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FanoutMessage {
    /// An accepted, non-duplicate packet
    Reading(Value),
    /// Heartbeat payload from the coordinator
    Heartbeat(String),
}

impl FanoutMessage {
    /// Reading message for `packet`.
    pub fn reading(packet: &SensorPacket) -> Self {
        FanoutMessage::Reading(json!({
            "address": packet.address,
            "sequence": packet.sequence,
            "received_at": packet.received_at.to_rfc3339(),
            "fields": fields_to_json(&packet.fields),
        }))
    }
}

/// Broadcast hub for subscriber connections.
#[derive(Debug, Clone)]
pub struct Fanout {
    tx: broadcast::Sender<FanoutMessage>,
}

impl Fanout {
    /// Hub buffering up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        tracing::debug!(capacity, "Fanout initialized");
        Self { tx }
    }

    /// Send to every current subscriber; returns how many received it.
    pub fn publish(&self, message: FanoutMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stream of messages published from now on. Lagged gaps are skipped.
    pub fn subscribe(&self) -> impl Stream<Item = FanoutMessage> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| async move {
            match result {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(error = ?e, "Fanout subscriber lagged");
                    None
                }
            }
        })
    }

    /// Accept subscribers on `listener` until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> GatewayResult<()> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "Fanout listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            tracing::info!(%peer, subscribers = self.subscriber_count() + 1, "Subscriber connected");
            let stream = self.subscribe();
            tokio::spawn(async move {
                if let Err(e) = forward(socket, stream).await {
                    tracing::debug!(%peer, error = %e, "Subscriber dropped");
                }
            });
        }
    }
}

async fn forward(
    mut socket: TcpStream,
    stream: impl Stream<Item = FanoutMessage>,
) -> GatewayResult<()> {
    futures::pin_mut!(stream);
    while let Some(message) = stream.next().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        socket.write_all(&line).await?;
    }
    Ok(())
}
