//! WebSocket connection and its event loop.
//!
//! The socket is owned by a spawned task. Outbound text goes through a
//! command channel; inbound text messages are split into frames and queued
//! for whoever is waiting on [`Connection::recv`]. The task also sends a
//! ping on every `ping_interval` tick to keep the server from idling the
//! connection out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::codec;
use crate::{Error, Result};

const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) type SyncSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum ConnectionCommand {
    Send {
        text: String,
        done: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

enum Inbound {
    Frames(Vec<Value>),
    Closed,
}

pub(crate) struct Connection {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Take ownership of `socket` and spawn its event loop.
    pub fn spawn(socket: SyncSocket, ping_interval: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_event_loop(
            socket,
            command_rx,
            inbound_tx,
            Arc::clone(&closed),
            ping_interval,
        ));

        Self {
            command_tx,
            inbound_rx,
            closed,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Send one already-framed text message.
    pub async fn send_text(&self, text: String) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.command_tx
            .send(ConnectionCommand::Send { text, done })
            .map_err(|_| Error::ConnectionClosed)?;
        result.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Frames from the next text message, `Ok(None)` if nothing arrives
    /// within `wait`.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<Vec<Value>>> {
        match timeout(wait, self.inbound_rx.recv()).await {
            Ok(Some(Inbound::Frames(frames))) => Ok(Some(frames)),
            Ok(Some(Inbound::Closed)) | Ok(None) => Err(Error::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_loop(
    socket: SyncSocket,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
    ping_interval: Duration,
) {
    let (mut ws_write, mut ws_read) = socket.split();
    let mut heartbeat = interval(ping_interval.max(MIN_PING_INTERVAL));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frames = codec::decode(text.as_str());
                        if !frames.is_empty() && inbound_tx.send(Inbound::Frames(frames)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "socket closed by server");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => trace!("pong"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "socket read failed");
                        break;
                    }
                    None => {
                        debug!("socket stream ended");
                        break;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Send { text, done }) => {
                        trace!(frame = text.trim_end_matches(codec::RECORD_SEPARATOR), "client frame");
                        let result = ws_write
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(Error::from);
                        let failed = result.is_err();
                        let _ = done.send(result);
                        if failed {
                            break;
                        }
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if let Err(e) = ws_write.send(Message::Ping(Vec::new().into())).await {
                    warn!(error = %e, "ping failed");
                    break;
                }
            }
        }
    }

    closed.store(true, Ordering::Release);
    let _ = inbound_tx.send(Inbound::Closed);
    debug!("socket event loop terminated");
}
