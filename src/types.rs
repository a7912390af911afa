//! Re-exported types from external crates for convenience.
//!
//! These types appear in the public API and are re-exported here so users don't need to
//! add these dependencies to their `Cargo.toml`.

/// Date and time types for snowflake timestamps.
pub use chrono::{DateTime, Utc};
/// Secret wrapper for the bot token.
pub use secrecy::{ExposeSecret, SecretString};
/// Raw event bodies are JSON values.
pub use serde_json::{Value, json};
