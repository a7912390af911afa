#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use secrecy::SecretString;
use serde_json::Value;
use url::Url;

use super::codec::{ConnectionProperties, Identify};
use crate::API_VERSION;
use crate::models::Intents;

const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for the gateway connection.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Gateway intents requested in Identify
    #[builder(default)]
    pub intents: Intents,
    /// Client properties reported in Identify
    #[builder(default)]
    pub properties: ConnectionProperties,
    /// Whether the client supports compressed dispatch payloads
    pub compress: Option<bool>,
    /// Member count above which offline members are not sent, between 50 and 250
    pub large_threshold: Option<u16>,
    /// `[shard_id, num_shards]`
    pub shard: Option<[u32; 2]>,
    /// Initial presence
    pub presence: Option<Value>,
    /// Gateway API version
    #[builder(default = API_VERSION)]
    pub api_version: u8,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Build the Identify body for `token`.
    #[must_use]
    pub fn identify(&self, token: SecretString) -> Identify {
        let mut identify = Identify::new(token, self.intents.bits());
        identify.properties = self.properties.clone();
        identify.compress = self.compress;
        identify.large_threshold = self.large_threshold;
        identify.shard = self.shard;
        identify.presence.clone_from(&self.presence);
        identify
    }

    /// Append the API version and encoding to a gateway or resume URL.
    pub fn connect_url(&self, base: &str) -> crate::Result<Url> {
        let mut url = Url::parse(base)?;
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "v" && key != "encoding")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("v", &self.api_version.to_string())
            .append_pair("encoding", "json");

        Ok(url)
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed connection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial backoff duration for first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn new(
        max_attempts: Option<u32>,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
