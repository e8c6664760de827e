use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug, Error)]
pub enum Error {
    /// Login rejected or the token endpoint returned no access token.
    #[error("authentication failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Authentication {
        status: Option<u16>,
        message: String,
    },

    #[error("negotiation failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Negotiation {
        status: Option<u16>,
        message: String,
    },

    #[error("no handshake acknowledgment within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("no sync payload within {0:?}")]
    SyncTimeout(Duration),

    #[error("not connected")]
    NotConnected,

    /// Device record was not produced by this client's session.
    #[error("device {0} is not bound to this client")]
    NotBound(String),

    #[error("invalid setpoint: {0}")]
    InvalidSetPoint(f64),

    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("mutation not supported for device family {0}")]
    UnsupportedDeviceFamily(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device fetch failed after {attempts} attempts: {last}")]
    DeviceFetchFailed {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[source] Box<WsError>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the facade may re-run the connect sequence and try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Negotiation { .. } => !self.is_auth_related(),
            Error::HandshakeTimeout(_)
            | Error::ConnectionClosed
            | Error::SyncTimeout(_)
            | Error::Protocol(_)
            | Error::Http(_)
            | Error::WebSocket(_)
            | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Token rejected somewhere along the connect path.
    pub fn is_auth_related(&self) -> bool {
        match self {
            Error::Authentication { .. } => true,
            Error::Negotiation {
                status: Some(401 | 403),
                ..
            } => true,
            Error::Http(e) => matches!(e.status().map(|s| s.as_u16()), Some(401 | 403)),
            _ => false,
        }
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::ConnectionClosed,
            other => Error::WebSocket(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_is_terminal() {
        let err = Error::Authentication {
            status: Some(400),
            message: "invalid_grant".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_auth_related());
        assert_eq!(err.to_string(), "authentication failed (400): invalid_grant");
    }

    #[test]
    fn negotiation_401_is_auth_related() {
        let err = Error::Negotiation {
            status: Some(401),
            message: String::new(),
        };
        assert!(err.is_auth_related());
        assert!(!err.is_retryable());

        let err = Error::Negotiation {
            status: Some(503),
            message: String::new(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_setpoint_is_terminal() {
        let err = Error::InvalidSetPoint(f64::NAN);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid setpoint: NaN");
    }

    #[test]
    fn transient_errors_retry() {
        assert!(Error::SyncTimeout(Duration::from_secs(1)).is_retryable());
        assert!(Error::ConnectionClosed.is_retryable());
        assert!(Error::HandshakeTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!Error::NotConnected.is_retryable());
        assert!(!Error::UnsupportedMode("X".into()).is_retryable());
    }

    #[test]
    fn closed_socket_maps_to_connection_closed() {
        let err: Error = WsError::ConnectionClosed.into();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
