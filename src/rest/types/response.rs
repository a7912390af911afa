use serde::{Deserialize, Serialize};

/// Response of gateway discovery.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    /// WebSocket URL, without version or encoding
    pub url: String,
}

/// Error body returned by the API on failure.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: u32,
    pub message: String,
}
