use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commands;
use crate::config::{BlissConfig, ClientIdentity, Credentials, Endpoints};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::parser::parse_payload;
use crate::session::Session;
use crate::sync::{SyncEngine, WriteReceipt};
use crate::types::*;
use crate::{Error, Result};

pub struct BlissClientBuilder {
    credentials: Credentials,
    config: BlissConfig,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl BlissClientBuilder {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::with_credentials(Credentials::new(username, password))
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials,
            config: BlissConfig::default(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn config(mut self, config: BlissConfig) -> Self {
        self.config = config;
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.token_url = url.into();
        self
    }

    pub fn negotiate_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.negotiate_url = url.into();
        self
    }

    pub fn sync_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.sync_url = url.into();
        self
    }

    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.config.identity = identity;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync_timeout = timeout;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.refresh_timeout = timeout;
        self
    }

    /// How long to wait for a write acknowledgment: `attempts` waits of `timeout` each.
    pub fn ack_wait(mut self, attempts: u32, timeout: Duration) -> Self {
        self.config.ack_attempts = attempts;
        self.config.ack_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<BlissClient> {
        let http = reqwest::Client::builder()
            .timeout(self.config.http_timeout)
            .build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let client_id = Uuid::new_v4();
        let engine = SyncEngine::new(client_id, &self.config).with_logger(logger);

        Ok(BlissClient {
            http,
            config: self.config,
            credentials: self.credentials,
            client_id,
            inner: Mutex::new(Inner {
                session: None,
                engine,
                devices: Vec::new(),
            }),
        })
    }
}

struct Inner {
    session: Option<Session>,
    engine: SyncEngine,
    devices: Vec<Device>,
}

impl Inner {
    /// Drop the session so the next fetch logs in again.
    fn invalidate(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

/// Entry point for platform integrations.
///
/// All operations are serialized: the server correlates replies by shape, so
/// only one exchange may be outstanding on the socket at a time.
pub struct BlissClient {
    http: reqwest::Client,
    config: BlissConfig,
    credentials: Credentials,
    client_id: Uuid,
    inner: Mutex<Inner>,
}

impl BlissClient {
    pub fn builder(username: impl Into<String>, password: impl Into<String>) -> BlissClientBuilder {
        BlissClientBuilder::new(username, password)
    }

    /// Stable for the lifetime of this client, across reconnects.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn config(&self) -> &BlissConfig {
        &self.config
    }

    fn new_session(&self) -> Session {
        Session::new(
            self.http.clone(),
            self.config.clone(),
            self.credentials.clone(),
            self.client_id,
        )
    }

    /// Log in and complete the socket handshake.
    pub async fn setup(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_session(&mut inner).await
    }

    /// Check the credentials with a one-off login. No socket is opened.
    pub async fn validate_credentials(&self) -> Result<bool> {
        match self.new_session().login().await {
            Ok(_) => Ok(true),
            Err(Error::Authentication { status, message }) => {
                debug!(?status, %message, "credentials rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_session(&self, inner: &mut Inner) -> Result<()> {
        if inner.session.as_ref().is_some_and(Session::is_ready) {
            return Ok(());
        }

        let session = inner.session.get_or_insert_with(|| self.new_session());
        match session.connect().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_auth_related() => {
                inner.invalidate();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "connect failed, retrying with a fresh session");
                inner.invalidate();
                let mut fresh = self.new_session();
                fresh.connect().await?;
                inner.session = Some(fresh);
                Ok(())
            }
        }
    }

    async fn fetch_once(&self, inner: &mut Inner) -> Result<Vec<Device>> {
        self.ensure_session(inner).await?;

        let Inner {
            session,
            engine,
            devices,
        } = inner;
        let session = session.as_mut().ok_or(Error::NotConnected)?;
        let snapshot = engine.passive_sync(session).await?;

        let fetched = bind(parse_payload(&snapshot.payload), engine.client_id());
        info!(
            count = fetched.len(),
            version = snapshot.server_sync_version,
            "devices fetched"
        );
        *devices = fetched.clone();
        Ok(fetched)
    }

    /// Fetch the full device list, reconnecting between failed attempts.
    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        let mut inner = self.inner.lock().await;
        let attempts = self.config.max_retries.max(1);

        let mut attempt = 1;
        loop {
            match self.fetch_once(&mut inner).await {
                Ok(devices) => return Ok(devices),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "device fetch failed");
                    inner.invalidate();
                    if attempt >= attempts {
                        return Err(Error::DeviceFetchFailed {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    attempt += 1;
                    sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Devices from the most recent successful fetch or write refresh.
    pub async fn cached_devices(&self) -> Vec<Device> {
        self.inner.lock().await.devices.clone()
    }

    pub async fn set_mode(&self, serial: &str, mode: Mode) -> Result<WriteReceipt> {
        let mut guard = self.inner.lock().await;
        let Inner {
            session,
            engine,
            devices,
        } = &mut *guard;

        let session = session
            .as_mut()
            .filter(|s| s.is_ready())
            .ok_or(Error::NotConnected)?;
        let device = find_device(devices, serial)?;

        let receipt = commands::set_mode(engine, session, device, mode).await?;
        apply_refresh(devices, engine.client_id(), &receipt);
        Ok(receipt)
    }

    /// Set the manual setpoint in °C. Puts the device in manual mode.
    pub async fn set_temperature(&self, serial: &str, value: f64) -> Result<WriteReceipt> {
        let mut guard = self.inner.lock().await;
        let Inner {
            session,
            engine,
            devices,
        } = &mut *guard;

        let session = session
            .as_mut()
            .filter(|s| s.is_ready())
            .ok_or(Error::NotConnected)?;
        let device = find_device(devices, serial)?;

        let receipt = commands::set_setpoint(engine, session, device, value).await?;
        apply_refresh(devices, engine.client_id(), &receipt);
        Ok(receipt)
    }

    pub async fn close(&self) {
        self.inner.lock().await.invalidate();
    }
}

fn bind(mut devices: Vec<Device>, client_id: Uuid) -> Vec<Device> {
    for device in &mut devices {
        device.binding = Some(client_id);
    }
    devices
}

fn find_device<'a>(devices: &'a mut [Device], key: &str) -> Result<&'a mut Device> {
    devices
        .iter_mut()
        .find(|d| d.key() == key)
        .ok_or_else(|| Error::DeviceNotFound(key.to_string()))
}

/// Replace the cache with the post-write snapshot. An empty snapshot keeps
/// the optimistic update instead.
fn apply_refresh(devices: &mut Vec<Device>, client_id: Uuid, receipt: &WriteReceipt) {
    let Some(ref snapshot) = receipt.refreshed else {
        return;
    };
    let fresh = parse_payload(&snapshot.payload);
    if fresh.is_empty() {
        debug!("post-write snapshot had no devices; keeping cached state");
        return;
    }
    *devices = bind(fresh, client_id);
}
