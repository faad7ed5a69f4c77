use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use voice_proto::protocol::{Message, PROTOCOL_VERSION};

/// Per-client queue for command replies.
const REPLY_CAPACITY: usize = 32;

pub struct ClientHandle {
    pub id: usize,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("Bridge listening at {}", addr);
        serve(listener, clients, event_tx, broadcast_tx).await;
    })
}

/// Accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;

                let client_count = {
                    let mut guard = clients.write().await;
                    guard.push(ClientHandle { id });
                    guard.len()
                };

                info!("Client {} connected from {}", id, peer);
                let _ = event_tx.send(DaemonEvent::ClientConnected).await;
                let _ = event_tx
                    .send(DaemonEvent::ClientCountChanged(client_count))
                    .await;

                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                let clients_ref = clients.clone();

                tokio::spawn(async move {
                    handle_client(stream, id, evt_tx.clone(), bcast_rx).await;

                    let client_count = {
                        let mut guard = clients_ref.write().await;
                        guard.retain(|c| c.id != id);
                        guard.len()
                    };
                    info!("Client {} disconnected", id);
                    let _ = evt_tx
                        .send(DaemonEvent::ClientCountChanged(client_count))
                        .await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Message>(REPLY_CAPACITY);
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = Message::Hello {
        protocol_version: PROTOCOL_VERSION,
    };
    if write_message(&mut write_half, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            let event = match Message::decode(&read_buf) {
                                Ok((msg, consumed)) => {
                                    read_buf.drain(..consumed);
                                    match msg {
                                        Message::Node(event) => DaemonEvent::Node(event),
                                        Message::Command(request) => {
                                            debug!("Client {} sent command {}", client_id, request.command.name());
                                            DaemonEvent::Command {
                                                request,
                                                reply_to: reply_tx.clone(),
                                            }
                                        }
                                        other => {
                                            warn!("Client {} sent unexpected frame: {:?}", client_id, other);
                                            continue;
                                        }
                                    }
                                }
                                Err(_) => break,
                            };
                            if event_tx.send(event).await.is_err() {
                                warn!("DaemonEvent channel closed");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            Some(reply) = reply_rx.recv() => {
                if write_message(&mut write_half, &reply).await.is_err() {
                    break;
                }
            }

            msg = broadcast_rx.recv() => {
                let outbound = match msg {
                    Ok(BroadcastMessage::Notification(n)) => Message::Notification(n),
                    Ok(BroadcastMessage::NodeRequest(r)) => Message::NodeRequest(r),
                    Ok(BroadcastMessage::Log(message)) => Message::Log { message },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        continue;
                    }
                    Err(_) => break,
                };
                if write_message(&mut write_half, &outbound).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn write_message(write_half: &mut OwnedWriteHalf, msg: &Message) -> anyhow::Result<()> {
    let encoded = msg.encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}
