//! Wire format of the gateway.
//!
//! Every frame is a JSON object `{"op": int, "d": any, "s": int|null, "t": string|null}`.
//! [`decode`] validates a received frame once, at the boundary, and produces an
//! [`Envelope`]. [`encode`] serializes the client-originated opcodes and never emits
//! `s` or `t`.

use std::fmt;

use secrecy::SecretString;
use serde::de::IntoDeserializer as _;
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::Serialize_repr;

use super::error::GatewayError;
use crate::serde_helpers::expose_secret;

/// Gateway operation codes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched (server only)
    Dispatch = 0,
    /// Liveness ping, sent by the client periodically or requested by the server
    Heartbeat = 1,
    /// Start a new session (client only)
    Identify = 2,
    /// Resume a previous session (client only)
    Resume = 6,
    /// The server asks the client to reconnect
    Reconnect = 7,
    /// The session has been invalidated
    InvalidSession = 9,
    /// Sent immediately after connecting, carries the heartbeat interval
    Hello = 10,
    /// Acknowledgement of a heartbeat
    HeartbeatAck = 11,
}

impl OpCode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.as_u8())
    }
}

/// Dispatch event type, the `t` field of a Dispatch frame.
///
/// The tag of a named variant is its name in `SCREAMING_SNAKE_CASE`. Other tags decode to
/// [`EventKind::Unknown`] so that new server events never break decoding. Custom listener
/// keys use the same variant.
#[non_exhaustive]
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::AsRefStr,
    strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Ready,
    Resumed,
    /// A guild became available, either during startup or after joining
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    PresenceUpdate,
    TypingStart,
    UserUpdate,
    /// Any event type without a dedicated variant
    #[serde(untagged)]
    #[strum(transparent)]
    Unknown(String),
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        let deserializer: StrDeserializer<'_, ValueError> = tag.into_deserializer();
        Self::deserialize(deserializer).unwrap_or_else(|_| Self::Unknown(tag.to_owned()))
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match Self::from(tag.as_str()) {
            Self::Unknown(_) => Self::Unknown(tag),
            kind => kind,
        }
    }
}

/// Close code of a gateway close frame, named for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            1000 => "Normal",
            1001 => "GoingAway",
            4000 => "UnknownError",
            4001 => "UnknownOpcode",
            4002 => "DecodeError",
            4003 => "NotAuthenticated",
            4004 => "AuthenticationFailed",
            4005 => "AlreadyAuthenticated",
            4007 => "InvalidSeq",
            4008 => "RateLimited",
            4009 => "SessionTimedOut",
            4010 => "InvalidShard",
            4011 => "ShardingRequired",
            4012 => "InvalidApiVersion",
            4013 => "InvalidIntents",
            4014 => "DisallowedIntents",
            _ => "Unrecognized",
        }
    }

    /// Codes after which a new session is rejected again unless the client's
    /// configuration changes.
    #[must_use]
    pub const fn is_configuration_error(self) -> bool {
        matches!(self.0, 4004 | 4010..=4014)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

/// Body of a Hello frame.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Session fields of the READY body needed to resume later.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub resume_gateway_url: String,
}

/// A decoded Dispatch frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub sequence: u64,
    pub kind: EventKind,
    pub data: Value,
    /// Present only for [`EventKind::Ready`]
    pub session: Option<SessionInfo>,
}

/// Client properties reported in Identify.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: "democord".to_owned(),
            device: "democord".to_owned(),
        }
    }
}

/// Body of an Identify frame.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    #[serde(serialize_with = "expose_secret")]
    pub token: SecretString,
    pub properties: ConnectionProperties,
    pub intents: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u16>,
    /// `[shard_id, num_shards]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,
}

impl Identify {
    #[must_use]
    pub fn new(token: SecretString, intents: u64) -> Self {
        Self {
            token,
            properties: ConnectionProperties::default(),
            intents,
            compress: None,
            large_threshold: None,
            shard: None,
            presence: None,
        }
    }
}

/// Body of a Resume frame.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    #[serde(serialize_with = "expose_secret")]
    pub token: SecretString,
    pub session_id: String,
    pub seq: u64,
}

impl Resume {
    #[must_use]
    pub fn new(token: SecretString, session_id: String, seq: u64) -> Self {
        Self {
            token,
            session_id,
            seq,
        }
    }
}

/// A decoded gateway frame.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Envelope {
    Dispatch(Dispatch),
    /// The server requests an immediate heartbeat
    Heartbeat,
    Identify(Identify),
    Resume(Resume),
    Reconnect {
        resumable: bool,
    },
    InvalidSession {
        resumable: bool,
    },
    Hello(Hello),
    HeartbeatAck,
}

impl Envelope {
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Dispatch(_) => OpCode::Dispatch,
            Self::Heartbeat => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::Resume(_) => OpCode::Resume,
            Self::Reconnect { .. } => OpCode::Reconnect,
            Self::InvalidSession { .. } => OpCode::InvalidSession,
            Self::Hello(_) => OpCode::Hello,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
        }
    }
}

/// Frames the client sends.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// Heartbeat carrying the last sequence number seen, if any
    Heartbeat(Option<u64>),
    Identify(Identify),
    Resume(Resume),
}

impl Outgoing {
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::Resume(_) => OpCode::Resume,
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    op: Option<u8>,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Serialize)]
struct Frame<'body, D: Serialize> {
    op: OpCode,
    d: &'body D,
}

fn malformed<S: Into<String>>(reason: S) -> GatewayError {
    GatewayError::MalformedPayload(reason.into())
}

fn body<'de, T: Deserialize<'de>>(op: OpCode, d: &'de Option<Value>) -> Result<T, GatewayError> {
    let d = d
        .as_ref()
        .ok_or_else(|| malformed(format!("{op} frame is missing `d`")))?;
    T::deserialize(d).map_err(|e| malformed(format!("{op} body: {e}")))
}

/// Decode a raw gateway frame.
pub fn decode(bytes: &[u8]) -> Result<Envelope, GatewayError> {
    let raw: RawFrame = serde_json::from_slice(bytes)?;
    let op = raw.op.ok_or_else(|| malformed("frame is missing `op`"))?;
    let op = OpCode::from_u8(op).ok_or_else(|| malformed(format!("unknown opcode {op}")))?;

    let envelope = match op {
        OpCode::Dispatch => {
            let sequence = raw
                .s
                .ok_or_else(|| malformed("Dispatch frame is missing `s`"))?;
            let kind = EventKind::from(
                raw.t
                    .ok_or_else(|| malformed("Dispatch frame is missing `t`"))?,
            );
            let data = raw.d.unwrap_or(Value::Null);
            let session = if kind == EventKind::Ready {
                let info = SessionInfo::deserialize(&data)
                    .map_err(|e| malformed(format!("READY body: {e}")))?;
                Some(info)
            } else {
                None
            };

            Envelope::Dispatch(Dispatch {
                sequence,
                kind,
                data,
                session,
            })
        }
        OpCode::Heartbeat => Envelope::Heartbeat,
        OpCode::Identify => Envelope::Identify(body(op, &raw.d)?),
        OpCode::Resume => Envelope::Resume(body(op, &raw.d)?),
        OpCode::Reconnect => Envelope::Reconnect {
            resumable: matches!(raw.d, Some(Value::Bool(true))),
        },
        OpCode::InvalidSession => Envelope::InvalidSession {
            resumable: matches!(raw.d, Some(Value::Bool(true))),
        },
        OpCode::Hello => Envelope::Hello(body(op, &raw.d)?),
        OpCode::HeartbeatAck => Envelope::HeartbeatAck,
    };

    Ok(envelope)
}

/// Encode a client frame as `{"op": .., "d": ..}`.
pub fn encode(outgoing: &Outgoing) -> Result<String, GatewayError> {
    let op = outgoing.opcode();
    let json = match outgoing {
        Outgoing::Heartbeat(sequence) => serde_json::to_string(&Frame { op, d: sequence }),
        Outgoing::Identify(identify) => serde_json::to_string(&Frame { op, d: identify }),
        Outgoing::Resume(resume) => serde_json::to_string(&Frame { op, d: resume }),
    };

    json.map_err(GatewayError::MessageParse)
}
