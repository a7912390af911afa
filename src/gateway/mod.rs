//! Gateway connection.
//!
//! # Architecture
//!
//! - [`codec`]: frame encoding and decoding, event type table, close codes
//! - [`heartbeat`]: jittered heartbeat timer with zombie detection
//! - [`state`]: [`SessionMachine`], which makes every identify/resume/reconnect decision
//! - [`Gateway`]: the read loop that owns the socket and executes the machine's actions
//! - [`EventSink`]: where decoded dispatches go
//!
//! # Example
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let gateway = Gateway::connect(&discovery_url, token, Config::default(), tx)?;
//!
//! while let Some(dispatch) = rx.recv().await {
//!     println!("{}", dispatch.kind);
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod state;
pub mod traits;

pub use codec::{CloseCode, Dispatch, EventKind, OpCode};
pub use config::{Config, ReconnectConfig};
pub use connection::Gateway;
#[expect(
    clippy::module_name_repetitions,
    reason = "GatewayError includes module name for clarity when used outside this module"
)]
pub use error::GatewayError;
pub use state::{Phase, SessionMachine};
pub use traits::EventSink;
