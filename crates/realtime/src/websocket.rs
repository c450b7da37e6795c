//! WebSocket server for the live task feed
//!
//! Each client connects, receives a connection `ack`, then sends
//! `task:register` with its responder id and mission. From then on it
//! receives every frame the notifier routes to it.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::directory::{ConnectionDirectory, ConnectionId};
use crate::error::Result;
use crate::messages::{ClientMessage, WsFrame};

/// WebSocket server state
pub struct WsServer {
    /// Where live connections are registered
    directory: Arc<ConnectionDirectory>,

    /// Server address
    addr: SocketAddr,
}

impl WsServer {
    /// Create new WebSocket server
    pub fn new(addr: SocketAddr, directory: Arc<ConnectionDirectory>) -> Self {
        Self { directory, addr }
    }

    /// Configured bind address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address and serve forever
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!(%peer_addr, "New WebSocket connection");
                    let server = Arc::clone(&self);

                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer_addr).await {
                            error!(%peer_addr, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Handle individual WebSocket connection
    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let ack = WsFrame::ack("Connected to Beacon task dispatch feed", None, None);
        ws_sender.send(Message::Text(ack.to_json()?)).await?;

        let (tx, mut outbound) = mpsc::unbounded_channel::<String>();
        let mut registration: Option<ConnectionId> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(ClientMessage::Register { user_id, mission_id }) => {
                                    if let Some(previous) = registration.take() {
                                        self.directory.unregister(previous).await;
                                    }
                                    let id = self
                                        .directory
                                        .register(&user_id, &mission_id, tx.clone())
                                        .await;
                                    registration = Some(id);
                                    info!(%peer_addr, user_id = %user_id, mission_id = %mission_id, "Client registered");
                                    WsFrame::ack("Registered", Some(&user_id), Some(&mission_id))
                                }
                                Ok(ClientMessage::Ping) => WsFrame::ack("pong", None, None),
                                Err(e) => {
                                    warn!(%peer_addr, error = %e, "Unrecognized client frame");
                                    WsFrame::error("unrecognized message")
                                }
                            };
                            let sent = match reply.to_json() {
                                Ok(json) => ws_sender.send(Message::Text(json)).await.map_err(Into::into),
                                Err(e) => Err(e),
                            };
                            if let Err(e) = sent {
                                warn!(%peer_addr, error = %e, "Error replying to client");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(%peer_addr, "Client disconnected");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(%peer_addr, error = %e, "Error receiving from client");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                Some(frame) = outbound.recv() => {
                    if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                        warn!(%peer_addr, error = %e, "Error sending to client");
                        break;
                    }
                }
            }
        }

        if let Some(id) = registration {
            self.directory.unregister(id).await;
        }

        Ok(())
    }
}
