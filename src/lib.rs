//! Client for Finder Bliss cloud thermostats.
//!
//! Devices are read and written over the vendor's SignalR-style sync hub:
//! an OAuth login, a negotiate call, then a WebSocket carrying
//! `\x1e`-terminated JSON frames. [`BlissClient`] wraps the whole sequence
//! with reconnect and retry handling.

mod client;
pub mod codec;
pub mod commands;
pub mod config;
mod connection;
mod diff;
mod error;
mod logger;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod sync;
mod types;

pub use client::{BlissClient, BlissClientBuilder};
pub use config::{BlissConfig, ClientIdentity, Credentials, Endpoints};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use session::{Session, SessionState};
pub use sync::{FrameTransport, SyncEngine, SyncSnapshot, SyncState, WriteReceipt};
pub use types::*;
