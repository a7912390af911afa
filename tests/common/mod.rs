#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::net::SocketAddr;
use std::time::Duration;

use democord::gateway::ReconnectConfig;
use democord::types::SecretString;
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const TOKEN: &str = "MTk4NjIyNDgzNDcxOTI1MjQ4.Cl2FMQ.ZnCjm1XVW7vRze4b7Cq4se7kKWs";

pub const SESSION_ID: &str = "d9b0c1c0a1c4b7a5e4b6c2f1a8e7d3c9";

pub const BOT_ID: &str = "80351110224678912";

const WAIT: Duration = Duration::from_secs(5);

#[must_use]
pub fn token() -> SecretString {
    SecretString::from(TOKEN)
}

/// Reconnect quickly so tests do not wait on the default backoff.
#[must_use]
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig::new(
        None,
        Duration::from_millis(10),
        Duration::from_millis(50),
        2.0,
    )
}

/// A frame received from the client under test.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Json(Value),
    Close(Option<u16>),
}

/// Server end of one accepted WebSocket connection.
pub struct ServerConnection {
    /// Path and query of the upgrade request
    pub uri: String,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl ServerConnection {
    pub fn send(&self, frame: &Value) {
        drop(self.outgoing.send(Message::Text(frame.to_string().into())));
    }

    pub fn hello(&self, heartbeat_interval: u64) {
        self.send(&json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_interval } }));
    }

    pub fn heartbeat_ack(&self) {
        self.send(&json!({ "op": 11 }));
    }

    pub fn dispatch(&self, sequence: u64, tag: &str, data: &Value) {
        self.send(&json!({ "op": 0, "s": sequence, "t": tag, "d": data }));
    }

    /// READY for the test bot, with `resume_url` as the resume gateway.
    pub fn ready(&self, sequence: u64, resume_url: &str) {
        self.dispatch(sequence, "READY", &ready_body(resume_url));
    }

    pub fn close(&self, code: u16, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from_static(reason),
        };
        drop(self.outgoing.send(Message::Close(Some(frame))));
    }

    /// Next frame from the client.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.recv_within(WAIT).await
    }

    /// Next frame from the client, `None` if nothing arrives within `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<ClientFrame> {
        timeout(wait, self.frames.recv()).await.ok().flatten()
    }

    /// Next JSON frame with opcode `op`. Heartbeats along the way are acknowledged.
    pub async fn recv_op(&mut self, op: u64) -> Option<Value> {
        loop {
            match self.recv().await? {
                ClientFrame::Json(frame) if frame["op"] == op => return Some(frame),
                ClientFrame::Json(frame) if frame["op"] == 1 => self.heartbeat_ack(),
                ClientFrame::Json(_) => {}
                ClientFrame::Close(_) => return None,
            }
        }
    }

    /// Close code of the client's close frame, skipping anything sent before it.
    pub async fn recv_close(&mut self) -> Option<Option<u16>> {
        loop {
            if let ClientFrame::Close(code) = self.recv().await? {
                return Some(code);
            }
        }
    }
}

/// Mock gateway server. Every accepted connection is handed to the test.
pub struct MockGateway {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MockGateway {
    /// Start a mock gateway on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connections_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let mut uri = String::new();
                let callback =
                    |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        uri = request.uri().to_string();
                        Ok(response)
                    };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let (frames_tx, frames) = mpsc::unbounded_channel();
                let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

                if connections_tx
                    .send(ServerConnection {
                        uri,
                        frames,
                        outgoing,
                    })
                    .is_err()
                {
                    break;
                }

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let frame = serde_json::from_str(text.as_str()).unwrap();
                                    drop(frames_tx.send(ClientFrame::Json(frame)));
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    let code = frame.map(|frame| u16::from(frame.code));
                                    drop(frames_tx.send(ClientFrame::Close(code)));
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            msg = outgoing_rx.recv() => match msg {
                                Some(message) => {
                                    if write.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        Self { addr, connections }
    }

    /// Base URL, as returned by gateway discovery.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the client to open the next connection.
    pub async fn accept(&mut self) -> ServerConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client did not connect in time")
            .unwrap()
    }
}

#[must_use]
pub fn ready_body(resume_url: &str) -> Value {
    json!({
        "v": 10,
        "user": {
            "id": BOT_ID,
            "username": "democord",
            "discriminator": "0",
            "global_name": "Democord Bot",
            "avatar": null,
            "bot": true
        },
        "session_id": SESSION_ID,
        "resume_gateway_url": resume_url,
        "application": { "id": BOT_ID, "flags": 0 },
        "guilds": [{ "id": "41771983423143937", "unavailable": true }]
    })
}

#[must_use]
pub fn guild_body(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "owner_id": BOT_ID,
        "features": [],
        "member_count": 2
    })
}

/// Wait until the watched phase satisfies `done`.
pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, done: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    timeout(WAIT, rx.wait_for(done))
        .await
        .expect("state was not reached in time")
        .unwrap()
        .clone()
}
