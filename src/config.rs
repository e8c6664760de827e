//! Runtime configuration. Defaults target the production Finder cloud.

use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.iot.findernet.com/connect/token";
pub const DEFAULT_NEGOTIATE_URL: &str = "https://bliss.iot.findernet.com/_sync/negotiate";
pub const DEFAULT_SYNC_URL: &str = "wss://bliss.iot.findernet.com/_sync";

pub const USERNAME_ENV: &str = "FINDER_BLISS_USERNAME";
pub const PASSWORD_ENV: &str = "FINDER_BLISS_PASSWORD";

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub token_url: String,
    pub negotiate_url: String,
    /// Socket URL without the `id` query parameter.
    pub sync_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            negotiate_url: DEFAULT_NEGOTIATE_URL.to_string(),
            sync_url: DEFAULT_SYNC_URL.to_string(),
        }
    }
}

/// Static identity reported in the `InitRequest`.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub platform: String,
    pub model: String,
    pub build: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            platform: "Android/7.1.1".to_string(),
            model: "OnePlus/ONEPLUS A5000".to_string(),
            build: "166".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlissConfig {
    pub endpoints: Endpoints,
    pub identity: ClientIdentity,
    /// Per-request bound for the token and negotiate calls.
    pub http_timeout: Duration,
    pub ping_interval: Duration,
    pub handshake_timeout: Duration,
    /// Bound on a passive sync waiting for `serverPayload`.
    pub sync_timeout: Duration,
    /// Bound on the passive sync that follows every write.
    pub refresh_timeout: Duration,
    pub ack_attempts: u32,
    pub ack_timeout: Duration,
    /// Total fetch attempts in `get_devices`, first one included.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for BlissConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            identity: ClientIdentity::default(),
            http_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(15),
            sync_timeout: Duration::from_secs(15),
            refresh_timeout: Duration::from_secs(5),
            ack_attempts: 3,
            ack_timeout: Duration::from_secs(3),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `FINDER_BLISS_USERNAME` / `FINDER_BLISS_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let read = |key: &str| match std::env::var(key) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(Error::Authentication {
                status: None,
                message: format!("{key} is not set"),
            }),
        };
        Ok(Self::new(read(USERNAME_ENV)?, read(PASSWORD_ENV)?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
