//! Login, negotiation and the socket handshake.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec;
use crate::config::{BlissConfig, Credentials};
use crate::connection::Connection;
use crate::protocol::{self, OAUTH_CLIENT_ID, OAUTH_GRANT_TYPE, OAUTH_SCOPE};
use crate::sync::FrameTransport;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AuthenticatingHttp,
    Negotiating,
    ConnectingSocket,
    HandshakeSent,
    InitSent,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::AuthenticatingHttp => "authenticating",
            SessionState::Negotiating => "negotiating",
            SessionState::ConnectingSocket => "connecting",
            SessionState::HandshakeSent => "handshake sent",
            SessionState::InitSent => "init sent",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
}

/// One authenticated socket to the sync hub.
///
/// A failed step leaves the session `Disconnected`; a new [`Session::connect`]
/// starts over from the login.
pub struct Session {
    http: reqwest::Client,
    config: BlissConfig,
    credentials: Credentials,
    client_id: Uuid,
    state: SessionState,
    connection: Option<Connection>,
}

impl Session {
    pub fn new(
        http: reqwest::Client,
        config: BlissConfig,
        credentials: Credentials,
        client_id: Uuid,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
            client_id,
            state: SessionState::Disconnected,
            connection: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// OAuth password grant; returns the access token.
    pub async fn login(&self) -> Result<String> {
        let url = &self.config.endpoints.token_url;
        debug!(%url, "requesting access token");

        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", OAUTH_GRANT_TYPE),
                ("client_id", OAUTH_CLIENT_ID),
                ("scope", OAUTH_SCOPE),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Authentication {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        serde_json::from_str::<TokenResponse>(&body)
            .ok()
            .and_then(|t| t.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication {
                status: Some(status.as_u16()),
                message: "no access_token in response".to_string(),
            })
    }

    async fn negotiate(&self, token: &str) -> Result<String> {
        let url = &self.config.endpoints.negotiate_url;
        debug!(%url, "negotiating connection");

        let response = self.http.post(url).bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Negotiation {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        serde_json::from_str::<NegotiateResponse>(&body)
            .ok()
            .and_then(|n| n.connection_id)
            .ok_or_else(|| Error::Negotiation {
                status: Some(status.as_u16()),
                message: "no connectionId in response".to_string(),
            })
    }

    async fn open_socket(&self, token: &str, connection_id: &str) -> Result<Connection> {
        let url = reqwest::Url::parse_with_params(
            &self.config.endpoints.sync_url,
            &[("id", connection_id)],
        )
        .map_err(|e| Error::Protocol(format!("invalid sync url: {e}")))?;
        debug!(%url, "opening sync socket");

        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Protocol(format!("invalid bearer header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(Connection::spawn(socket, self.config.ping_interval))
    }

    /// Run the full connect sequence. Replaces any existing socket.
    pub async fn connect(&mut self) -> Result<()> {
        self.close();
        match self.run_connect().await {
            Ok(()) => {
                self.state = SessionState::Ready;
                info!(client_id = %self.client_id, "sync session ready");
                Ok(())
            }
            Err(e) => {
                debug!(state = %self.state, error = %e, "connect failed");
                self.close();
                Err(e)
            }
        }
    }

    async fn run_connect(&mut self) -> Result<()> {
        self.state = SessionState::AuthenticatingHttp;
        let token = self.login().await?;

        self.state = SessionState::Negotiating;
        let connection_id = self.negotiate(&token).await?;

        self.state = SessionState::ConnectingSocket;
        self.connection = Some(self.open_socket(&token, &connection_id).await?);

        self.write(&protocol::handshake_message()).await?;
        self.state = SessionState::HandshakeSent;

        let init = protocol::init_message(self.client_id, &self.config.identity);
        self.write(&init).await?;
        self.state = SessionState::InitSent;

        self.await_handshake_ack().await
    }

    async fn await_handshake_ack(&mut self) -> Result<()> {
        let wait = self.config.handshake_timeout;
        let deadline = Instant::now() + wait;
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::HandshakeTimeout(wait));
            }
            match connection.recv(remaining).await? {
                Some(frames) if frames.iter().any(protocol::is_ack) => return Ok(()),
                Some(frames) => debug!(count = frames.len(), "frames before handshake ack"),
                None => return Err(Error::HandshakeTimeout(wait)),
            }
        }
    }

    async fn write(&self, frame: &Value) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(Error::NotConnected)?;
        connection.send_text(codec::encode(frame)?).await
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Drop the socket. Safe to call in any state.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown();
            debug!("sync socket closed");
        }
        self.state = SessionState::Disconnected;
    }
}

#[async_trait]
impl FrameTransport for Session {
    fn is_ready(&self) -> bool {
        Session::is_ready(self)
    }

    async fn send_frame(&mut self, frame: &Value) -> Result<()> {
        let result = self.write(frame).await;
        if matches!(result, Err(Error::ConnectionClosed)) {
            self.state = SessionState::Disconnected;
        }
        result
    }

    async fn recv_frames(&mut self, wait: Duration) -> Result<Option<Vec<Value>>> {
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let result = connection.recv(wait).await;
        if matches!(result, Err(Error::ConnectionClosed)) {
            self.state = SessionState::Disconnected;
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
