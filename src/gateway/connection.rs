#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::codec::{self, CloseCode, Envelope, Outgoing, Resume};
use super::config::Config;
use super::error::GatewayError;
use super::heartbeat::{HeartbeatSignal, HeartbeatState, Heartbeater};
use super::state::{Action, ConnectTarget, Phase, ReconnectMode, ResumeState, SessionMachine};
use super::traits::EventSink;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code telling the server the session should stay resumable.
const RESUMABLE_CLOSE_CODE: u16 = 4000;

/// A running gateway connection.
///
/// The connection loop runs in a background task. It owns the socket, the
/// [`SessionMachine`] and the heartbeat timer, and replaces the transport on every
/// reconnect or resume. Decoded dispatches are handed to the [`EventSink`].
///
/// # Example
///
/// ```ignore
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let gateway = Gateway::connect("wss://gateway.discord.gg", token, Config::default(), tx)?;
///
/// while let Some(dispatch) = rx.recv().await {
///     println!("{} #{}", dispatch.kind, dispatch.sequence);
/// }
/// ```
#[derive(Debug)]
pub struct Gateway {
    /// Watch channel receiver for phase changes
    state_rx: watch::Receiver<Phase>,
    /// Cancels the connection loop
    shutdown: CancellationToken,
    /// Connection loop task
    handle: JoinHandle<()>,
}

impl Gateway {
    /// Validate `endpoint` and start the connection loop.
    ///
    /// `endpoint` is the discovery URL, without the version and encoding query.
    pub fn connect<S: EventSink>(
        endpoint: &str,
        token: SecretString,
        config: Config,
        sink: S,
    ) -> Result<Self> {
        let discovery = config.connect_url(endpoint)?;
        let (state_tx, state_rx) = watch::channel(Phase::Connecting);
        let shutdown = CancellationToken::new();

        let shared = Shared {
            discovery,
            token,
            config,
            sink,
            state_tx,
            shutdown: shutdown.clone(),
        };

        let handle = tokio::spawn(async move {
            connection_loop(shared).await;
        });

        Ok(Self {
            state_rx,
            shutdown,
            handle,
        })
    }

    /// Get the current connection phase.
    #[must_use]
    pub fn state(&self) -> Phase {
        *self.state_rx.borrow()
    }

    /// Subscribe to phase changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<Phase> {
        self.state_rx.clone()
    }

    /// Whether the connection loop has exited, either through shutdown or because the
    /// reconnect attempts were exhausted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Close the socket with a normal close code and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "gateway connection task failed");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

/// Everything the connection loop needs across transports.
struct Shared<S> {
    discovery: Url,
    token: SecretString,
    config: Config,
    sink: S,
    state_tx: watch::Sender<Phase>,
    shutdown: CancellationToken,
}

impl<S> Shared<S> {
    fn publish_phase(&self, phase: Phase) {
        self.state_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                #[cfg(feature = "tracing")]
                tracing::debug!(from = %current, to = %phase, "gateway phase changed");
                *current = phase;
                true
            }
        });
    }
}

/// How a single transport ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect {
        /// A session reached READY or RESUMED on this transport
        established: bool,
    },
}

/// Main connection loop with automatic reconnection.
async fn connection_loop<S: EventSink>(shared: Shared<S>) {
    let mut machine = SessionMachine::new();
    let mut attempt = 0_u32;
    let mut backoff: ExponentialBackoff = shared.config.reconnect.clone().into();

    loop {
        let url = target_url(&shared, &mut machine);
        shared.publish_phase(machine.phase());

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, attempt, "connecting to gateway");

        let connected = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        let mut established = false;
        match connected {
            Ok((ws_stream, _)) => {
                machine.connected();
                shared.publish_phase(machine.phase());

                match run_session(ws_stream, &mut machine, &shared).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Reconnect { established: true } => {
                        established = true;
                        attempt = 0;
                        backoff.reset();
                    }
                    SessionEnd::Reconnect { established: false } => {
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
            Err(e) => {
                let error = GatewayError::Connection(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %error, "unable to connect to gateway");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                machine.transport_lost();
                attempt = attempt.saturating_add(1);
            }
        }

        // Check if we should stop reconnecting
        if let Some(max) = shared.config.reconnect.max_attempts
            && attempt >= max
        {
            #[cfg(feature = "tracing")]
            tracing::error!(attempt, "giving up on the gateway after repeated failures");
            break;
        }

        shared.publish_phase(machine.phase());

        if !established && let Some(duration) = backoff.next_backoff() {
            tokio::select! {
                () = shared.shutdown.cancelled() => break,
                () = sleep(duration) => {}
            }
        }
    }

    machine.close();
    shared.publish_phase(machine.phase());
}

/// URL of the next transport. A resume URL that cannot be parsed falls back to a fresh
/// session on the discovery URL.
fn target_url<S>(shared: &Shared<S>, machine: &mut SessionMachine) -> Url {
    match machine.begin_connect() {
        ConnectTarget::Resume(resume_url) => match shared.config.connect_url(&resume_url) {
            Ok(url) => url,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%resume_url, error = %e, "invalid resume url, identifying fresh");
                #[cfg(not(feature = "tracing"))]
                let _ = (&resume_url, &e);
                machine.transport_lost();
                machine.begin_connect();
                shared.discovery.clone()
            }
        },
        ConnectTarget::Discovery => shared.discovery.clone(),
    }
}

/// One iteration of the read loop.
enum Step {
    Inbound(Envelope),
    Beat,
    Lost(GatewayError),
    Skip,
    Shutdown,
}

/// Drive one transport until it has to be replaced or the gateway shuts down.
async fn run_session<S: EventSink>(
    ws_stream: WsStream,
    machine: &mut SessionMachine,
    shared: &Shared<S>,
) -> SessionEnd {
    let (write, mut read) = ws_stream.split();
    let mut session = Session {
        write,
        machine,
        shared,
        heartbeat: Arc::new(HeartbeatState::new()),
        heartbeater: None,
        signals: None,
        established: false,
    };

    loop {
        let step = tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => Step::Shutdown,

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    session.heartbeat.acknowledge();

                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "received gateway frame");

                    match codec::decode(text.as_bytes()) {
                        Ok(envelope) => Step::Inbound(envelope),
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(%text, error = %e, "dropping undecodable gateway frame");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                            Step::Skip
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => Step::Lost(closed(frame)),
                Some(Ok(_)) => {
                    // Binary frames and transport level ping/pong are not part of the protocol
                    Step::Skip
                }
                Some(Err(e)) => Step::Lost(GatewayError::Connection(e)),
                None => Step::Lost(GatewayError::ConnectionClosed {
                    code: None,
                    reason: "stream ended".to_owned(),
                }),
            },

            signal = next_signal(&mut session.signals) => match signal {
                Some(HeartbeatSignal::Beat) => Step::Beat,
                Some(HeartbeatSignal::Zombied) => Step::Lost(GatewayError::Zombied),
                None => Step::Lost(GatewayError::HeartbeatStopped),
            },
        };

        let outcome = match step {
            Step::Skip => Ok(None),
            Step::Shutdown => {
                session.close(WsCloseCode::Normal, "shutting down").await;
                session.machine.close();
                return SessionEnd::Shutdown;
            }
            Step::Beat => session.send_heartbeat().await.map(|()| None),
            Step::Lost(e) => Err(e),
            Step::Inbound(envelope) => match session.machine.handle(envelope) {
                Ok(actions) => session.perform_all(actions).await,
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(None) => {
                if session.machine.phase().is_established() {
                    session.established = true;
                }
                shared.publish_phase(session.machine.phase());
            }
            Ok(Some(mode)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?mode, "gateway requested reconnect");

                let code = match mode {
                    ReconnectMode::Resume => WsCloseCode::from(RESUMABLE_CLOSE_CODE),
                    ReconnectMode::Fresh => WsCloseCode::Normal,
                };
                session.close(code, "reconnecting").await;
                return SessionEnd::Reconnect {
                    established: session.established,
                };
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                match &e {
                    GatewayError::ConnectionClosed {
                        code: Some(code), ..
                    } if code.is_configuration_error() => {
                        tracing::error!(error = %e, "gateway rejected the session configuration");
                    }
                    _ => tracing::warn!(error = %e, "gateway connection lost, reconnecting"),
                }
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                session.machine.transport_lost();
                session.close(WsCloseCode::Normal, "reconnecting").await;
                return SessionEnd::Reconnect {
                    established: session.established,
                };
            }
        }
    }
}

fn closed(frame: Option<CloseFrame>) -> GatewayError {
    match frame {
        Some(frame) => GatewayError::ConnectionClosed {
            code: Some(CloseCode(u16::from(frame.code))),
            reason: frame.reason.as_str().to_owned(),
        },
        None => GatewayError::ConnectionClosed {
            code: None,
            reason: String::new(),
        },
    }
}

/// Next heartbeat signal, pending forever while no timer is running.
async fn next_signal(
    signals: &mut Option<mpsc::UnboundedReceiver<HeartbeatSignal>>,
) -> Option<HeartbeatSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// State owned by a single transport.
struct Session<'a, S> {
    write: SplitSink<WsStream, Message>,
    machine: &'a mut SessionMachine,
    shared: &'a Shared<S>,
    heartbeat: Arc<HeartbeatState>,
    heartbeater: Option<Heartbeater>,
    signals: Option<mpsc::UnboundedReceiver<HeartbeatSignal>>,
    established: bool,
}

impl<S: EventSink> Session<'_, S> {
    /// Carry out the actions for one frame. Returns the reconnect mode if the transport
    /// has to be replaced.
    async fn perform_all(
        &mut self,
        actions: Vec<Action>,
    ) -> std::result::Result<Option<ReconnectMode>, GatewayError> {
        for action in actions {
            match action {
                Action::StartHeartbeat(interval) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(?interval, "received Hello");
                    self.start_heartbeat(interval).await;
                }
                Action::Identify => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("sending Identify");
                    let identify = self.shared.config.identify(self.shared.token.clone());
                    self.send(&Outgoing::Identify(identify)).await?;
                }
                Action::Resume(ResumeState { session_id, seq }) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%session_id, seq, "sending Resume");
                    let resume = Resume::new(self.shared.token.clone(), session_id, seq);
                    self.send(&Outgoing::Resume(resume)).await?;
                }
                Action::HeartbeatNow => self.send_heartbeat().await?,
                Action::Forward(dispatch) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(kind = %dispatch.kind, seq = dispatch.sequence, "forwarding dispatch");
                    self.shared.sink.publish(dispatch);
                }
                Action::Reconnect(mode) => return Ok(Some(mode)),
            }
        }

        Ok(None)
    }

    async fn start_heartbeat(&mut self, interval: std::time::Duration) {
        self.stop_heartbeat().await;

        let (tx, rx) = mpsc::unbounded_channel();
        self.heartbeater = Some(Heartbeater::start(
            interval,
            Arc::clone(&self.heartbeat),
            tx,
            &self.shared.shutdown,
        ));
        self.signals = Some(rx);
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(heartbeater) = self.heartbeater.take() {
            heartbeater.stop().await;
        }
        self.signals = None;
    }

    async fn send_heartbeat(&mut self) -> std::result::Result<(), GatewayError> {
        let sequence = self.machine.sequence();

        #[cfg(feature = "tracing")]
        tracing::trace!(?sequence, "sending heartbeat");

        self.send(&Outgoing::Heartbeat(sequence)).await
    }

    async fn send(&mut self, outgoing: &Outgoing) -> std::result::Result<(), GatewayError> {
        let json = codec::encode(outgoing)?;
        self.write
            .send(Message::Text(json.into()))
            .await
            .map_err(GatewayError::Connection)
    }

    /// Stop the timer before the transport is discarded, then close it.
    async fn close(&mut self, code: WsCloseCode, reason: &'static str) {
        self.stop_heartbeat().await;

        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        };
        // The peer may already be gone
        _ = self.write.send(Message::Close(Some(frame))).await;
        _ = self.write.close().await;
    }
}
