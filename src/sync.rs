//! Passive and active `SyncRequest` exchanges.
//!
//! The server does not tag its replies with a request id in every case.
//! When a reply echoes `clientOperationId` it is matched against the pending
//! operation; otherwise the engine falls back to recognising the reply by
//! shape (a sync frame carrying `serverPayload` or `serverSyncVersion`).
//! Because of that, only one exchange may be in flight per transport.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BlissConfig;
use crate::logger::MessageLogger;
use crate::protocol::{self, OPERATION_KEY_ALL};
use crate::{Error, Result};

/// A channel that carries decoded frames to and from the server.
#[async_trait]
pub trait FrameTransport: Send {
    /// Handshake completed and the socket is still open.
    fn is_ready(&self) -> bool;

    async fn send_frame(&mut self, frame: &Value) -> Result<()>;

    /// Next batch of frames, or `Ok(None)` when nothing arrives within `wait`.
    /// A close from the server is `Err(Error::ConnectionClosed)`.
    async fn recv_frames(&mut self, wait: Duration) -> Result<Option<Vec<Value>>>;
}

/// Last `serverSyncVersion` seen. Never moves backwards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    server_sync_version: u64,
}

impl SyncState {
    pub fn server_sync_version(&self) -> u64 {
        self.server_sync_version
    }

    /// Returns true when `version` advanced the state.
    pub fn observe(&mut self, version: u64) -> bool {
        if version > self.server_sync_version {
            self.server_sync_version = version;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub server_sync_version: u64,
    /// Raw `serverPayload`; a JSON string or an inline object.
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub operation_id: Uuid,
    /// A new `serverSyncVersion` was observed for this write.
    pub acknowledged: bool,
    pub server_sync_version: u64,
    /// Result of the passive sync issued after the write, if it succeeded.
    pub refreshed: Option<SyncSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Correlation {
    Echoed,
    Foreign,
    Unkeyed,
}

fn correlate(argument: &Value, operation_id: Uuid) -> Correlation {
    let echoed = argument
        .get("clientOperationId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    match echoed {
        Some(id) if id == operation_id => Correlation::Echoed,
        Some(id) if !id.is_nil() => Correlation::Foreign,
        _ => Correlation::Unkeyed,
    }
}

pub struct SyncEngine {
    client_id: Uuid,
    state: SyncState,
    sync_timeout: Duration,
    refresh_timeout: Duration,
    ack_attempts: u32,
    ack_timeout: Duration,
    logger: Option<MessageLogger>,
}

impl SyncEngine {
    pub fn new(client_id: Uuid, config: &BlissConfig) -> Self {
        Self {
            client_id,
            state: SyncState::default(),
            sync_timeout: config.sync_timeout,
            refresh_timeout: config.refresh_timeout,
            ack_attempts: config.ack_attempts,
            ack_timeout: config.ack_timeout,
            logger: None,
        }
    }

    pub(crate) fn with_logger(mut self, logger: Option<MessageLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn server_sync_version(&self) -> u64 {
        self.state.server_sync_version()
    }

    /// Request the full device list.
    pub async fn passive_sync<T>(&mut self, link: &mut T) -> Result<SyncSnapshot>
    where
        T: FrameTransport + ?Sized,
    {
        let wait = self.sync_timeout;
        self.passive_sync_within(link, wait).await
    }

    async fn passive_sync_within<T>(&mut self, link: &mut T, wait: Duration) -> Result<SyncSnapshot>
    where
        T: FrameTransport + ?Sized,
    {
        if !link.is_ready() {
            return Err(Error::NotConnected);
        }
        let request = protocol::passive_sync_message(self.client_id);
        self.send(link, &request).await?;

        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::SyncTimeout(wait));
            }
            let Some(frames) = link.recv_frames(remaining).await? else {
                return Err(Error::SyncTimeout(wait));
            };

            for frame in &frames {
                for argument in protocol::sync_arguments(frame) {
                    let payload = match argument.get("serverPayload") {
                        None | Some(Value::Null) => continue,
                        Some(payload) => payload,
                    };
                    if let Some(version) = argument.get("serverSyncVersion").and_then(|v| v.as_u64())
                        && self.state.observe(version)
                    {
                        debug!(version, "server sync version advanced");
                    }
                    let version = self.state.server_sync_version();
                    if let Some(ref mut logger) = self.logger {
                        logger.log_sync(version, payload);
                    }
                    return Ok(SyncSnapshot {
                        server_sync_version: version,
                        payload: payload.clone(),
                    });
                }
            }
        }
    }

    /// Submit one mutated device object, then refresh.
    ///
    /// The write counts as sent even when no acknowledgment arrives within
    /// the bounded wait; [`WriteReceipt::acknowledged`] reports which case
    /// occurred.
    pub async fn active_sync<T>(
        &mut self,
        link: &mut T,
        operation_key: &str,
        device: &Value,
    ) -> Result<WriteReceipt>
    where
        T: FrameTransport + ?Sized,
    {
        if !link.is_ready() {
            return Err(Error::NotConnected);
        }

        let operation_id = Uuid::new_v4();
        let payload = protocol::client_payload(device)?;
        let request = protocol::active_sync_message(
            self.client_id,
            operation_id,
            operation_key,
            self.state.server_sync_version(),
            &payload,
        );
        self.send(link, &request).await?;

        let acknowledged = self.await_ack(link, operation_id).await?;
        if !acknowledged {
            warn!(%operation_id, "no acknowledgment observed for write");
        }

        let refresh_timeout = self.refresh_timeout;
        let refreshed = match self.passive_sync_within(link, refresh_timeout).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "post-write refresh failed");
                None
            }
        };

        Ok(WriteReceipt {
            operation_id,
            acknowledged,
            server_sync_version: self.state.server_sync_version(),
            refreshed,
        })
    }

    /// Write with the catch-all operation key.
    pub async fn write_device<T>(&mut self, link: &mut T, device: &Value) -> Result<WriteReceipt>
    where
        T: FrameTransport + ?Sized,
    {
        self.active_sync(link, OPERATION_KEY_ALL, device).await
    }

    async fn await_ack<T>(&mut self, link: &mut T, operation_id: Uuid) -> Result<bool>
    where
        T: FrameTransport + ?Sized,
    {
        for attempt in 1..=self.ack_attempts {
            let Some(frames) = link.recv_frames(self.ack_timeout).await? else {
                debug!(attempt, "acknowledgment wait timed out");
                return Ok(false);
            };

            for frame in &frames {
                for argument in protocol::sync_arguments(frame) {
                    let Some(version) = argument.get("serverSyncVersion").and_then(|v| v.as_u64())
                    else {
                        continue;
                    };
                    let advanced = self.state.observe(version);
                    match correlate(argument, operation_id) {
                        Correlation::Foreign => {
                            debug!(version, "version update for a different operation");
                        }
                        Correlation::Echoed | Correlation::Unkeyed if advanced => {
                            debug!(version, attempt, "write acknowledged");
                            return Ok(true);
                        }
                        Correlation::Echoed | Correlation::Unkeyed => {
                            debug!(version, "stale version, still waiting");
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    async fn send<T>(&mut self, link: &mut T, frame: &Value) -> Result<()>
    where
        T: FrameTransport + ?Sized,
    {
        if let Some(ref mut logger) = self.logger {
            logger.log_send(frame);
        }
        link.send_frame(frame).await
    }
}
