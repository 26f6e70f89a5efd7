//! WebSocket server and connection handling.
//!
//! Connections only parse and forward. Every inbound envelope goes onto one
//! queue drained by the coordinator task, so all game-state mutation
//! happens in arrival order on a single consumer.

use crate::bots;
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, Inbound};
use crate::protocol::{Envelope, Performative, ProtocolError, ServerEnvelope};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An outbound channel bound to one identity
pub struct Endpoint {
    /// Which connection currently owns the identity
    pub connection_id: Uuid,
    pub sender: mpsc::UnboundedSender<ServerEnvelope>,
}

/// Server state shared across all connections.
pub struct ServerState {
    /// Identity to outbound channel
    pub endpoints: DashMap<String, Endpoint>,
    /// The coordinator's inbound queue
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl ServerState {
    pub fn new(inbound: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            endpoints: DashMap::new(),
            inbound,
        }
    }

    /// Queue a message for the coordinator.
    pub fn submit(&self, message: Inbound) {
        if self.inbound.send(message).is_err() {
            debug!("Coordinator has shut down, dropping inbound message");
        }
    }

    /// Bind `identity` to a connection. A newer connection for the same
    /// identity replaces the older one.
    pub fn bind(
        &self,
        identity: &str,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEnvelope>,
    ) {
        let previous = self.endpoints.insert(
            identity.to_string(),
            Endpoint {
                connection_id,
                sender,
            },
        );
        if previous.is_some() {
            info!(player = %identity, "Identity rebound to a new connection");
        }
    }

    /// Release `identity` if `connection_id` still owns it.
    pub fn unbind(&self, identity: &str, connection_id: Uuid) -> bool {
        self.endpoints
            .remove_if(identity, |_, endpoint| endpoint.connection_id == connection_id)
            .is_some()
    }

    /// Hand an envelope to its recipient, or to everyone for a broadcast.
    pub fn deliver(&self, envelope: ServerEnvelope) {
        if envelope.is_broadcast() {
            for endpoint in self.endpoints.iter() {
                let _ = endpoint.sender.send(envelope.clone());
            }
        } else if let Some(endpoint) = self.endpoints.get(&envelope.recipient) {
            let _ = endpoint.sender.send(envelope);
        } else {
            debug!(recipient = %envelope.recipient, "No endpoint for recipient");
        }
    }
}

/// Run the WebSocket server until the session is stopped.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let state = Arc::new(ServerState::new(inbound_tx));

    let listener = TcpListener::bind(config.addr).await?;
    info!("Hazz2 coordinator listening on {}", config.addr);

    let coordinator = Coordinator::new(config.session.clone());
    let mut coordinator_task = tokio::spawn(run_coordinator(
        coordinator,
        inbound_rx,
        Arc::clone(&state),
    ));

    bots::spawn_local_bots(&config, &state)?;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer_addr, state).await {
                            error!("Connection error from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            finished = &mut coordinator_task => {
                if let Err(e) = finished {
                    error!("Coordinator task failed: {}", e);
                }
                break;
            }
        }
    }

    // Let the session report reach everyone before the process exits.
    tokio::time::sleep(config.shutdown_grace).await;
    info!("Session over, shutting down");
    Ok(())
}

/// Drain the inbound queue into the coordinator until the session stops.
async fn run_coordinator(
    mut coordinator: Coordinator,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    state: Arc<ServerState>,
) {
    while let Some(message) = inbound.recv().await {
        for envelope in coordinator.handle(message) {
            state.deliver(envelope);
        }
        if coordinator.is_stopped() {
            break;
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let connection_id = Uuid::new_v4();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEnvelope>();

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode outbound message: {}", e),
            }
        }
    });

    // Bound on the first subscribe
    let mut identity: Option<String> = None;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let envelope = match Envelope::parse(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", addr, e);
                        continue;
                    }
                };

                if let Err(e) = check_sender(&mut identity, &envelope) {
                    warn!("Dropping message from {}: {}", addr, e);
                    continue;
                }
                if envelope.performative == Performative::Subscribe {
                    state.bind(&envelope.sender, connection_id, tx.clone());
                }

                state.submit(Inbound::Message(envelope));
            }
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", addr);
                break;
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", addr, e);
                break;
            }
            _ => {}
        }
    }

    // Clean up on disconnect
    if let Some(identity) = identity {
        if state.unbind(&identity, connection_id) {
            state.submit(Inbound::Disconnected { identity });
        }
    }
    send_task.abort();

    info!("Connection closed for {}", addr);
    Ok(())
}

/// A connection speaks for exactly one identity: the sender of its first
/// subscribe.
fn check_sender(identity: &mut Option<String>, envelope: &Envelope) -> Result<(), ProtocolError> {
    match identity {
        Some(bound) if *bound != envelope.sender => Err(ProtocolError::SenderMismatch {
            bound: bound.clone(),
            claimed: envelope.sender.clone(),
        }),
        Some(_) => Ok(()),
        None if envelope.performative == Performative::Subscribe => {
            *identity = Some(envelope.sender.clone());
            Ok(())
        }
        None => Err(ProtocolError::NotSubscribed),
    }
}
