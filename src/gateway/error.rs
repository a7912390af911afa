#![expect(
    clippy::module_name_repetitions,
    reason = "GatewayError includes the module name for clarity when used outside this module"
)]

use std::error::Error as StdError;
use std::fmt;

use super::codec::CloseCode;
use super::state::Phase;

/// Gateway error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum GatewayError {
    /// Error connecting to or communicating with the gateway
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing a gateway frame as JSON
    MessageParse(serde_json::Error),
    /// A frame was valid JSON but lacked required fields or had the wrong shape
    MalformedPayload(String),
    /// The gateway closed the connection
    ConnectionClosed {
        /// Close code sent by the server, if any
        code: Option<CloseCode>,
        /// Close reason sent by the server
        reason: String,
    },
    /// No message of any kind arrived between two heartbeats
    Zombied,
    /// The heartbeat timer stopped without being cancelled
    HeartbeatStopped,
    /// A handshake or frame was attempted in a phase where it is not valid
    ProtocolViolation {
        /// Phase the connection was in
        phase: Phase,
        /// What was attempted
        attempted: &'static str,
    },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Gateway connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse gateway message: {e}"),
            Self::MalformedPayload(reason) => write!(f, "Malformed gateway payload: {reason}"),
            Self::ConnectionClosed {
                code: Some(code),
                reason,
            } => write!(f, "Gateway connection closed with {code}: {reason}"),
            Self::ConnectionClosed { code: None, reason } => {
                write!(f, "Gateway connection closed: {reason}")
            }
            Self::Zombied => write!(f, "Gateway connection zombied: heartbeat was not acknowledged"),
            Self::HeartbeatStopped => write!(f, "Heartbeat timer stopped unexpectedly"),
            Self::ProtocolViolation { phase, attempted } => {
                write!(f, "Protocol violation: {attempted} is not valid while {phase}")
            }
        }
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::MessageParse(e)
    }
}

// Integration with main Error type
impl From<GatewayError> for crate::error::Error {
    fn from(e: GatewayError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Gateway, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(
            crate::error::Kind::Gateway,
            GatewayError::Connection(e),
        )
    }
}
