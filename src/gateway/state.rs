//! Protocol decisions of a gateway session, independent of any socket.
//!
//! [`SessionMachine`] is driven by the read loop in [`super::connection`]. It consumes
//! decoded [`Envelope`]s and transport events and answers with [`Action`]s for the loop to
//! carry out. Every reconnect/resume decision is made here.

use std::fmt;
use std::time::Duration;

use super::codec::{Dispatch, Envelope, EventKind, SessionInfo};
use super::error::GatewayError;

/// Lifecycle phase of the gateway connection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Phase {
    /// Opening a transport
    Connecting,
    /// Transport open, waiting for Hello
    AwaitingHello,
    /// Identify sent, waiting for READY
    Identifying,
    /// Resume sent, waiting for RESUMED
    Resuming,
    /// READY or RESUMED received
    Ready,
    /// Steady state, receiving dispatches
    Dispatching,
    /// The current transport is being torn down and will be replaced
    Reconnecting,
    /// Shut down by the user
    Closed,
}

impl Phase {
    /// Whether a session has been established on the current transport.
    #[must_use]
    pub const fn is_established(self) -> bool {
        matches!(self, Self::Ready | Self::Dispatching)
    }
}

/// Where the next transport connects to.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// The URL from gateway discovery, followed by a fresh Identify
    Discovery,
    /// The cached resume URL, followed by Resume
    Resume(String),
}

/// How the current transport should be replaced.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    Fresh,
    Resume,
}

/// Session id and sequence carried by a Resume frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    pub session_id: String,
    pub seq: u64,
}

/// Work the read loop has to perform in response to an input.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start the heartbeat timer with the interval from Hello
    StartHeartbeat(Duration),
    /// Send Identify
    Identify,
    /// Send Resume
    Resume(ResumeState),
    /// Answer a server heartbeat request immediately
    HeartbeatNow,
    /// Hand a dispatch to the event sink
    Forward(Dispatch),
    /// Tear down the transport and connect again
    Reconnect(ReconnectMode),
}

#[derive(Debug, Clone)]
struct Session {
    id: String,
    resume_url: String,
}

/// Gateway session state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    phase: Phase,
    sequence: Option<u64>,
    session: Option<Session>,
    /// Identify or Resume already sent on the current transport
    handshake_sent: bool,
    /// The next transport should resume instead of identifying
    resume_next: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Connecting,
            sequence: None,
            session: None,
            handshake_sent: false,
            resume_next: false,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last sequence number received, `None` until the first dispatch of a session.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.resume_url.as_str())
    }

    /// Pick the target of the next transport and enter [`Phase::Connecting`].
    pub fn begin_connect(&mut self) -> ConnectTarget {
        self.phase = Phase::Connecting;
        self.handshake_sent = false;

        match (&self.session, self.resume_next) {
            (Some(session), true) if self.sequence.is_some() => {
                ConnectTarget::Resume(session.resume_url.clone())
            }
            _ => {
                self.resume_next = false;
                ConnectTarget::Discovery
            }
        }
    }

    /// A transport is open.
    pub fn connected(&mut self) {
        self.phase = Phase::AwaitingHello;
        self.handshake_sent = false;
    }

    /// Route one decoded frame.
    pub fn handle(&mut self, envelope: Envelope) -> Result<Vec<Action>, GatewayError> {
        match envelope {
            Envelope::Hello(hello) => self.on_hello(Duration::from_millis(hello.heartbeat_interval)),
            Envelope::HeartbeatAck => Ok(Vec::new()),
            Envelope::Heartbeat => {
                if self.handshake_sent {
                    Ok(vec![Action::HeartbeatNow])
                } else {
                    Err(self.violation("heartbeat before Hello"))
                }
            }
            Envelope::Reconnect { resumable } => Ok(vec![self.request_reconnect(resumable)]),
            Envelope::InvalidSession { .. } => {
                self.forget_session();
                self.phase = Phase::Reconnecting;
                Ok(vec![Action::Reconnect(ReconnectMode::Fresh)])
            }
            Envelope::Dispatch(dispatch) => self.on_dispatch(dispatch),
            Envelope::Identify(_) | Envelope::Resume(_) => {
                Err(self.violation("receiving a client-only opcode"))
            }
        }
    }

    /// The transport failed, closed without a resume signal, or was declared zombied.
    pub fn transport_lost(&mut self) -> Action {
        if self.phase != Phase::Closed {
            self.phase = Phase::Reconnecting;
        }
        self.resume_next = false;
        Action::Reconnect(ReconnectMode::Fresh)
    }

    /// User-initiated shutdown.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    fn on_hello(&mut self, interval: Duration) -> Result<Vec<Action>, GatewayError> {
        if self.phase != Phase::AwaitingHello || self.handshake_sent {
            return Err(self.violation("Hello"));
        }

        let handshake = self.handshake()?;
        Ok(vec![Action::StartHeartbeat(interval), handshake])
    }

    /// The only place Identify and Resume are produced.
    fn handshake(&mut self) -> Result<Action, GatewayError> {
        if self.phase != Phase::AwaitingHello || self.handshake_sent {
            return Err(self.violation("a handshake"));
        }
        self.handshake_sent = true;

        let resume = match (&self.session, self.sequence) {
            (Some(session), Some(seq)) if self.resume_next => Some(ResumeState {
                session_id: session.id.clone(),
                seq,
            }),
            _ => None,
        };
        self.resume_next = false;

        if let Some(state) = resume {
            self.phase = Phase::Resuming;
            Ok(Action::Resume(state))
        } else {
            self.forget_session();
            self.phase = Phase::Identifying;
            Ok(Action::Identify)
        }
    }

    fn request_reconnect(&mut self, resumable: bool) -> Action {
        self.phase = Phase::Reconnecting;
        if resumable && self.session.is_some() && self.sequence.is_some() {
            self.resume_next = true;
            Action::Reconnect(ReconnectMode::Resume)
        } else {
            self.resume_next = false;
            Action::Reconnect(ReconnectMode::Fresh)
        }
    }

    fn on_dispatch(&mut self, dispatch: Dispatch) -> Result<Vec<Action>, GatewayError> {
        match self.phase {
            Phase::Identifying | Phase::Resuming | Phase::Ready | Phase::Dispatching => {}
            _ => return Err(self.violation("a dispatch before the handshake")),
        }

        self.sequence = Some(
            self.sequence
                .map_or(dispatch.sequence, |last| last.max(dispatch.sequence)),
        );

        match (&dispatch.kind, self.phase) {
            (EventKind::Ready, _) => {
                if let Some(SessionInfo {
                    session_id,
                    resume_gateway_url,
                }) = &dispatch.session
                {
                    self.session = Some(Session {
                        id: session_id.clone(),
                        resume_url: resume_gateway_url.clone(),
                    });
                }
                self.phase = Phase::Ready;
            }
            (EventKind::Resumed, _) => self.phase = Phase::Ready,
            (_, Phase::Ready) => self.phase = Phase::Dispatching,
            _ => {}
        }

        Ok(vec![Action::Forward(dispatch)])
    }

    fn forget_session(&mut self) {
        self.session = None;
        self.sequence = None;
        self.resume_next = false;
    }

    fn violation(&self, attempted: &'static str) -> GatewayError {
        GatewayError::ProtocolViolation {
            phase: self.phase,
            attempted,
        }
    }
}

impl fmt::Display for SessionMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (seq {:?})", self.phase, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::gateway::codec::{Hello, decode};

    fn hello(interval: u64) -> Envelope {
        Envelope::Hello(Hello {
            heartbeat_interval: interval,
        })
    }

    fn dispatch(sequence: u64, tag: &str) -> Envelope {
        decode(
            json!({"op": 0, "s": sequence, "t": tag, "d": {"id": "1"}})
                .to_string()
                .as_bytes(),
        )
        .unwrap()
    }

    fn ready(sequence: u64) -> Envelope {
        decode(
            json!({
                "op": 0,
                "s": sequence,
                "t": "READY",
                "d": {"session_id": "abc", "resume_gateway_url": "wss://resume.example.com"}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    /// Connect, Hello, READY and `extra` more dispatches.
    fn established(extra: u64) -> SessionMachine {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.begin_connect(), ConnectTarget::Discovery);
        machine.connected();
        machine.handle(hello(41250)).unwrap();
        machine.handle(ready(1)).unwrap();
        for seq in 2..=extra + 1 {
            machine.handle(dispatch(seq, "GUILD_CREATE")).unwrap();
        }
        machine
    }

    #[test]
    fn hello_starts_heartbeat_then_identifies() {
        let mut machine = SessionMachine::new();
        machine.begin_connect();
        machine.connected();

        let actions = machine.handle(hello(41250)).unwrap();

        assert_eq!(
            actions,
            vec![
                Action::StartHeartbeat(Duration::from_millis(41250)),
                Action::Identify
            ]
        );
        assert_eq!(machine.phase(), Phase::Identifying);
    }

    #[test]
    fn second_hello_on_same_transport_is_refused() {
        let mut machine = SessionMachine::new();
        machine.begin_connect();
        machine.connected();
        machine.handle(hello(41250)).unwrap();

        let err = machine.handle(hello(41250)).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation { .. }));
    }

    #[test]
    fn nothing_is_sent_before_hello() {
        let mut machine = SessionMachine::new();
        machine.begin_connect();
        machine.connected();

        assert!(machine.handle(Envelope::Heartbeat).is_err());
        assert!(machine.handle(dispatch(1, "GUILD_CREATE")).is_err());
        assert_eq!(machine.sequence(), None);
        assert_eq!(machine.phase(), Phase::AwaitingHello);
    }

    #[test]
    fn hello_before_transport_is_refused() {
        let mut machine = SessionMachine::new();
        machine.begin_connect();

        assert!(machine.handle(hello(1000)).is_err());
    }

    #[test]
    fn ready_caches_session_and_sequence() {
        let machine = established(0);

        assert_eq!(machine.phase(), Phase::Ready);
        assert_eq!(machine.session_id(), Some("abc"));
        assert_eq!(machine.resume_url(), Some("wss://resume.example.com"));
        assert_eq!(machine.sequence(), Some(1));
    }

    #[test]
    fn dispatch_after_ready_enters_steady_state() {
        let machine = established(1);
        assert_eq!(machine.phase(), Phase::Dispatching);
    }

    #[test]
    fn sequence_tracks_maximum() {
        let mut machine = established(0);
        for seq in [2, 3, 7, 5, 6] {
            machine.handle(dispatch(seq, "MESSAGE_CREATE")).unwrap();
        }

        assert_eq!(machine.sequence(), Some(7));
    }

    #[test]
    fn resumable_reconnect_resumes_with_cached_sequence() {
        let mut machine = established(41);

        let actions = machine.handle(Envelope::Reconnect { resumable: true }).unwrap();
        assert_eq!(actions, vec![Action::Reconnect(ReconnectMode::Resume)]);
        assert_eq!(machine.phase(), Phase::Reconnecting);

        assert_eq!(
            machine.begin_connect(),
            ConnectTarget::Resume("wss://resume.example.com".to_owned())
        );
        machine.connected();
        let actions = machine.handle(hello(41250)).unwrap();

        assert_eq!(
            actions[1],
            Action::Resume(ResumeState {
                session_id: "abc".to_owned(),
                seq: 42,
            })
        );
        assert_eq!(machine.phase(), Phase::Resuming);
    }

    #[test]
    fn resumed_keeps_state() {
        let mut machine = established(41);
        machine.handle(Envelope::Reconnect { resumable: true }).unwrap();
        machine.begin_connect();
        machine.connected();
        machine.handle(hello(41250)).unwrap();

        machine.handle(dispatch(43, "RESUMED")).unwrap();

        assert_eq!(machine.phase(), Phase::Ready);
        assert_eq!(machine.session_id(), Some("abc"));
        assert_eq!(machine.sequence(), Some(43));
    }

    #[test]
    fn invalid_session_during_resume_identifies_fresh() {
        let mut machine = established(10);
        machine.handle(Envelope::Reconnect { resumable: true }).unwrap();
        machine.begin_connect();
        machine.connected();
        machine.handle(hello(41250)).unwrap();

        let actions = machine
            .handle(Envelope::InvalidSession { resumable: false })
            .unwrap();

        assert_eq!(actions, vec![Action::Reconnect(ReconnectMode::Fresh)]);
        assert_eq!(machine.session_id(), None);
        assert_eq!(machine.sequence(), None);
        assert_eq!(machine.begin_connect(), ConnectTarget::Discovery);
        machine.connected();
        assert_eq!(machine.handle(hello(41250)).unwrap()[1], Action::Identify);
    }

    #[test]
    fn reconnect_without_flag_identifies_fresh() {
        let mut machine = established(3);

        let actions = machine.handle(Envelope::Reconnect { resumable: false }).unwrap();

        assert_eq!(actions, vec![Action::Reconnect(ReconnectMode::Fresh)]);
        assert_eq!(machine.begin_connect(), ConnectTarget::Discovery);
        machine.connected();
        assert_eq!(machine.handle(hello(41250)).unwrap()[1], Action::Identify);
        assert_eq!(machine.sequence(), None);
    }

    #[test]
    fn transport_loss_never_resumes() {
        let mut machine = established(3);
        machine.handle(Envelope::Reconnect { resumable: true }).unwrap();

        assert_eq!(
            machine.transport_lost(),
            Action::Reconnect(ReconnectMode::Fresh)
        );
        assert_eq!(machine.begin_connect(), ConnectTarget::Discovery);
    }

    #[test]
    fn one_handshake_per_transport() {
        let mut machine = SessionMachine::new();
        let mut handshakes = 0;

        for _ in 0..3 {
            machine.begin_connect();
            machine.connected();
            for action in machine.handle(hello(1000)).unwrap() {
                if matches!(action, Action::Identify | Action::Resume(_)) {
                    handshakes += 1;
                }
            }
            assert!(machine.handle(hello(1000)).is_err());
            machine.transport_lost();
        }

        assert_eq!(handshakes, 3);
    }

    #[test]
    fn server_heartbeat_request_is_answered() {
        let mut machine = established(0);
        assert_eq!(
            machine.handle(Envelope::Heartbeat).unwrap(),
            vec![Action::HeartbeatNow]
        );
    }

    #[test]
    fn dispatch_is_forwarded_with_body() {
        let mut machine = established(0);

        let actions = machine.handle(dispatch(2, "GUILD_CREATE")).unwrap();

        let [Action::Forward(forwarded)] = actions.as_slice() else {
            panic!("expected a single forward");
        };
        assert_eq!(forwarded.kind, EventKind::GuildCreate);
        assert_eq!(forwarded.data, json!({"id": "1"}));
        assert_ne!(forwarded.data, Value::Null);
    }

    #[test]
    fn close_is_terminal_for_transport_loss() {
        let mut machine = established(0);
        machine.close();
        machine.transport_lost();
        assert_eq!(machine.phase(), Phase::Closed);
    }
}
