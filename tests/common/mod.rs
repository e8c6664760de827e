//! In-process stand-in for the Finder cloud.
//!
//! Token and negotiate endpoints are served by wiremock; the sync hub is a
//! small tokio-tungstenite server that speaks just enough of the protocol to
//! drive the client end to end.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use finder_bliss::{BlissClient, BlissClientBuilder};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-token";
pub const CONNECTION_ID: &str = "conn-1";
pub const START_VERSION: u64 = 100;

pub fn living_room() -> Value {
    json!({
        "tag": "BLISS2",
        "serialNumber": "S1",
        "name": "Living",
        "handle": 1,
        "houseHandle": 10,
        "gatewayHandle": 20,
        "role": "OWNER",
        "channel": 0,
        "isDeleted": false,
        "measures": "{\"temperature\":{\"value\":235},\"setPoint\":{\"value\":205},\"humidity\":{\"value\":48},\"mode\":1}",
        "settings": "{\"primary\":{\"mode\":\"AUTO\"}}",
        "schedules": "[]"
    })
}

pub fn hallway() -> Value {
    json!({
        "tag": "BLISS1",
        "serialNumber": "S0",
        "name": "Hallway",
        "handle": 2,
        "measures": "{\"temperature\":198}",
        "settings": "{\"mode\":\"AUTO\"}",
        "schedules": "[]"
    })
}

/// Switches and recordings shared with the socket tasks.
pub struct HubState {
    pub ack_handshake: AtomicBool,
    pub answer_sync: AtomicBool,
    pub ack_writes: AtomicBool,
    pub close_next_sync: AtomicBool,
    pub close_on_init: AtomicBool,
    pub version: AtomicU64,
    pub connections: AtomicUsize,
    pub pings: AtomicUsize,
    pub devices: Mutex<Vec<Value>>,
    pub frames: Mutex<Vec<Value>>,
    pub socket_queries: Mutex<Vec<String>>,
}

impl HubState {
    fn new() -> Self {
        Self {
            ack_handshake: AtomicBool::new(true),
            answer_sync: AtomicBool::new(true),
            ack_writes: AtomicBool::new(true),
            close_next_sync: AtomicBool::new(false),
            close_on_init: AtomicBool::new(false),
            version: AtomicU64::new(START_VERSION),
            connections: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            devices: Mutex::new(vec![living_room(), hallway()]),
            frames: Mutex::new(Vec::new()),
            socket_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn frames_with_status(&self, status: &str) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["arguments"][0]["status"] == status)
            .cloned()
            .collect()
    }

    pub fn init_frames(&self) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["target"] == "InitRequest")
            .cloned()
            .collect()
    }

    fn payload(&self) -> String {
        json!({ "devices": *self.devices.lock().unwrap() }).to_string()
    }

    fn apply_write(&self, argument: &Value) {
        let Some(text) = argument["clientPayload"].as_str() else {
            return;
        };
        let written: Value = serde_json::from_str(text).unwrap();
        let mut devices = self.devices.lock().unwrap();
        for update in written["devices"].as_array().unwrap() {
            if let Some(existing) = devices
                .iter_mut()
                .find(|d| d["serialNumber"] == update["serialNumber"])
            {
                existing["settings"] = update["settings"].clone();
            }
        }
    }

    /// Texts to send back for one client frame; `None` closes the socket.
    fn respond(&self, frame: &Value) -> Option<Vec<String>> {
        if frame.get("protocol").is_some() {
            if self.ack_handshake.load(Ordering::SeqCst) {
                // a keep-alive ahead of the ack, in the same message
                return Some(vec!["{\"type\":6}\u{1e}{}\u{1e}".to_string()]);
            }
            return Some(vec![]);
        }
        if frame["target"] == "InitRequest" && self.close_on_init.load(Ordering::SeqCst) {
            return None;
        }
        if frame["target"] != "SyncRequest" {
            return Some(vec![]);
        }

        let argument = &frame["arguments"][0];
        match argument["status"].as_str() {
            Some("SYNC") => {
                if self.close_next_sync.swap(false, Ordering::SeqCst) {
                    return None;
                }
                if !self.answer_sync.load(Ordering::SeqCst) {
                    return Some(vec![]);
                }
                let reply = json!({
                    "type": 1,
                    "target": "SyncResponse",
                    "arguments": [{
                        "serverSyncVersion": self.version.load(Ordering::SeqCst),
                        "serverPayload": self.payload(),
                    }]
                });
                Some(vec![format!("{reply}\u{1e}")])
            }
            Some("ACTIVE") => {
                self.apply_write(argument);
                let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
                if !self.ack_writes.load(Ordering::SeqCst) {
                    return Some(vec![]);
                }
                let ack = json!({
                    "type": 1,
                    "target": "SyncResponse",
                    "arguments": [{
                        "clientOperationId": argument["clientOperationId"],
                        "serverSyncVersion": version,
                        "serverPayload": null,
                    }]
                });
                Some(vec![format!("{ack}\u{1e}")])
            }
            _ => Some(vec![]),
        }
    }
}

pub struct FakeCloud {
    pub http: MockServer,
    pub ws_addr: SocketAddr,
    pub hub: Arc<HubState>,
}

impl FakeCloud {
    /// Cloud accepting any credentials.
    pub async fn start() -> Self {
        let cloud = Self::start_without_token().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": TOKEN, "token_type": "Bearer"})),
            )
            .mount(&cloud.http)
            .await;
        cloud
    }

    /// Cloud with negotiate and socket, but no token mock mounted.
    pub async fn start_without_token() -> Self {
        let http = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_sync/negotiate"))
            .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connectionId": CONNECTION_ID,
                "availableTransports": [{"transport": "WebSockets"}]
            })))
            .mount(&http)
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = listener.local_addr().unwrap();
        let hub = Arc::new(HubState::new());

        let accept_hub = Arc::clone(&hub);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_socket(stream, Arc::clone(&accept_hub)));
            }
        });

        Self { http, ws_addr, hub }
    }

    pub fn builder(&self) -> BlissClientBuilder {
        BlissClient::builder("user@example.com", "secret")
            .token_url(format!("{}/connect/token", self.http.uri()))
            .negotiate_url(format!("{}/_sync/negotiate", self.http.uri()))
            .sync_url(format!("ws://{}/_sync", self.ws_addr))
            .handshake_timeout(Duration::from_millis(500))
            .sync_timeout(Duration::from_millis(500))
            .refresh_timeout(Duration::from_millis(500))
            .ack_wait(2, Duration::from_millis(200))
            .retry_delay(Duration::from_millis(10))
    }

    pub fn client(&self) -> BlissClient {
        self.builder().build().unwrap()
    }

    pub async fn token_requests(&self) -> usize {
        self.http
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/connect/token")
            .count()
    }
}

async fn serve_socket(stream: TcpStream, hub: Arc<HubState>) {
    let check_hub = Arc::clone(&hub);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        check_hub
            .socket_queries
            .lock()
            .unwrap()
            .push(request.uri().query().unwrap_or_default().to_string());
        let authorized = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {TOKEN}").as_str());
        if authorized {
            Ok(response)
        } else {
            Err(http::Response::builder().status(401).body(None).unwrap())
        }
    };

    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    hub.connections.fetch_add(1, Ordering::SeqCst);

    while let Some(Ok(message)) = ws.next().await {
        if message.is_ping() {
            hub.pings.fetch_add(1, Ordering::SeqCst);
        }
        let Message::Text(text) = message else {
            continue;
        };
        for raw in text.as_str().split('\u{1e}').filter(|s| !s.trim().is_empty()) {
            let frame: Value = serde_json::from_str(raw).unwrap();
            hub.frames.lock().unwrap().push(frame.clone());
            match hub.respond(&frame) {
                Some(replies) => {
                    for reply in replies {
                        if ws.send(Message::Text(reply.into())).await.is_err() {
                            return;
                        }
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    }
}
