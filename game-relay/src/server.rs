//! Websocket transport for game clients.
//!
//! Each accepted connection gets a reader task, which forwards text frames
//! into one shared inbound channel, and a writer task fed by the
//! [`ConnectionHub`]. The session only ever sees the serialized inbound
//! stream and the hub's broadcast.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::protocol::{self, Message};
use crate::session::Broadcaster;

/// A text frame received from one connection.
#[derive(Debug)]
pub struct Inbound {
    pub connection: Uuid,
    pub text: String,
}

/// Outbound senders for every live connection.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    connections: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<String>>> {
        // A poisoned map is still a valid map of senders.
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a connection. Returns its id and the receiver its writer drains.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        (id, rx)
    }

    pub fn remove(&self, id: &Uuid) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

impl Broadcaster for ConnectionHub {
    fn broadcast(&self, message: &Message) {
        let text = match protocol::encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };

        let connections = self.lock();
        if connections.is_empty() {
            tracing::warn!("Broadcasting {} with no connected clients", message.kind());
        }
        for (id, tx) in connections.iter() {
            if tx.send(text.clone()).is_err() {
                tracing::warn!("Failed to send {} to connection {}", message.kind(), id);
            }
        }
    }
}

/// Accept websocket clients forever.
pub async fn serve(listener: TcpListener, hub: ConnectionHub, inbound: mpsc::Sender<Inbound>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, hub.clone(), inbound.clone()));
            }
            Err(e) => {
                tracing::error!("Accept failed: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: ConnectionHub,
    inbound: mpsc::Sender<Inbound>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("Websocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();
    let (id, mut outbound) = hub.register();
    tracing::info!("Client {} connected from {} ({} live)", id, addr, hub.len());

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            tracing::debug!("→ {} {}", id, text);
            if let Err(e) = write.send(WsMessage::Text(text)).await {
                tracing::warn!("Write to {} failed: {}", id, e);
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                tracing::debug!("← {} {}", id, text);
                if inbound
                    .send(Inbound {
                        connection: id,
                        text,
                    })
                    .await
                    .is_err()
                {
                    tracing::warn!("Inbound channel closed, dropping client {}", id);
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(other) => {
                tracing::trace!("Ignoring non-text frame from {}: {:?}", id, other);
            }
            Err(e) => {
                tracing::warn!("Read from {} failed: {}", id, e);
                break;
            }
        }
    }

    hub.remove(&id);
    writer.abort();
    tracing::info!("Client {} disconnected ({} live)", id, hub.len());
}
