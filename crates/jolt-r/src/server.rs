use futures::{SinkExt, StreamExt};
use jolt_engine::protocol::{BridgeInbound, ContentMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Local WebSocket endpoint the browser extension connects to.
///
/// Every connected extension gets each outbound [`ContentMessage`]; whatever
/// they send lands on one inbound queue, tagged with the connection it came
/// from.
#[derive(Clone)]
pub struct BridgeServer {
    port: u16,
    outbound_tx: broadcast::Sender<ContentMessage>,
}

/// One inbound item: a parsed frame, or the end of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Frame { connection: u64, frame: BridgeInbound },
    Disconnected { connection: u64 },
}

pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub outbound_tx: broadcast::Sender<ContentMessage>,
    pub inbound_rx: Arc<Mutex<mpsc::Receiver<InboundEvent>>>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Extensions currently connected.
    pub fn connections(&self) -> usize {
        self.outbound_tx.receiver_count()
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl BridgeServer {
    pub fn new(port: u16) -> Self {
        let (outbound_tx, _) = broadcast::channel(100);
        Self { port, outbound_tx }
    }

    pub async fn start(&self) -> std::io::Result<ServerHandle> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Bridge listening on: {}", local_addr);

        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let outbound_tx = self.outbound_tx.clone();
        let accept_outbound = outbound_tx.clone();

        let accept_task = tokio::spawn(async move {
            debug!("Bridge accept loop started");
            let mut next_connection = 0u64;
            while let Ok((stream, peer)) = listener.accept().await {
                next_connection += 1;
                info!(connection = next_connection, "Accepted TCP connection from: {}", peer);
                let outbound_rx = accept_outbound.subscribe();
                let inbound_tx = inbound_tx.clone();
                let connection = next_connection;
                tokio::spawn(async move {
                    accept_connection(stream, connection, outbound_rx, &inbound_tx).await;
                    let _ = inbound_tx.send(InboundEvent::Disconnected { connection }).await;
                });
            }
        });

        Ok(ServerHandle {
            local_addr,
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            accept_task,
        })
    }
}

async fn accept_connection(
    stream: TcpStream,
    connection: u64,
    mut outbound_rx: broadcast::Receiver<ContentMessage>,
    inbound_tx: &mpsc::Sender<InboundEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    info!(connection, "Extension connected");
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Ok(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode message for extension: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sender.send(Message::Text(json)).await {
                        error!("Failed to send message to WS: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Extension lagged behind outbound messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<BridgeInbound>(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(InboundEvent::Frame { connection, frame }).await.is_err() {
                                debug!("Bridge consumer gone");
                                break;
                            }
                        }
                        Err(e) => warn!("Unrecognised frame from extension: {} | Text: {}", e, text),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(connection, "Extension disconnected");
                    break;
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
