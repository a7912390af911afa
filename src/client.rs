//! Application facade.
//!
//! A [`Client`] owns the REST client, the [`Cache`], the [`EventDispatcher`] and, once
//! connected, the [`Gateway`]. Dispatches flow from the gateway's read loop into the
//! cache and then to listeners:
//!
//! ```text
//! Gateway read loop ── Dispatch ──> Handler ── apply ──> Cache
//!                                      └── schedule ──> EventDispatcher ──> listeners
//! ```

use std::future::Future;
use std::sync::Arc;

use bon::Builder;
use secrecy::SecretString;
use tokio::sync::{Mutex, watch};

use crate::auth::token_from_env;
use crate::cache::{Cache, Resolved};
use crate::dispatcher::{DispatchMode, EventContext, EventDispatcher};
use crate::error::{BoxError, Error};
use crate::gateway::codec::{Dispatch, EventKind};
use crate::gateway::{self, EventSink, Gateway, Phase};
use crate::{DEFAULT_API_BASE, Result, rest};

/// Configuration for the [`Client`].
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// REST API base, without the version segment
    #[builder(default = DEFAULT_API_BASE.to_owned(), into)]
    pub api_base: String,
    /// Identify and reconnect settings
    #[builder(default)]
    pub gateway: gateway::Config,
    #[builder(default)]
    pub dispatch_mode: DispatchMode,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A bot client.
///
/// # Example
///
/// ```no_run
/// use democord::{Client, Config};
/// use democord::gateway::EventKind;
/// use democord::models::Intents;
///
/// # async fn example() -> democord::Result<()> {
/// let config = Config::builder()
///     .gateway(democord::gateway::Config::builder().intents(Intents::non_privileged()).build())
///     .build();
/// let client = Client::from_env(config)?;
///
/// client.on(EventKind::Ready, |ctx| async move {
///     if let Some(user) = &ctx.user {
///         println!("logged in as {}", user.display_name());
///     }
///     Ok::<_, democord::BoxError>(())
/// });
///
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    token: SecretString,
    config: Config,
    rest: rest::Client,
    cache: Arc<Cache>,
    dispatcher: Arc<EventDispatcher>,
    gateway: Mutex<Option<Gateway>>,
}

impl Client {
    /// Create a client. Nothing is sent until [`connect`](Self::connect).
    pub fn new(token: SecretString, config: Config) -> Result<Self> {
        let rest = rest::Client::new(&config.api_base, &token)?;
        let dispatcher = EventDispatcher::new(config.dispatch_mode);

        Ok(Self {
            token,
            config,
            rest,
            cache: Arc::new(Cache::new()),
            dispatcher: Arc::new(dispatcher),
            gateway: Mutex::new(None),
        })
    }

    /// Create a client with the token from the [`TOKEN_VAR`](crate::TOKEN_VAR) environment
    /// variable.
    pub fn from_env(config: Config) -> Result<Self> {
        Self::new(token_from_env()?, config)
    }

    /// Register a listener for `kind`. Plain strings name custom or unknown events.
    pub fn on<K, F, Fut>(&self, kind: K, listener: F)
    where
        K: Into<EventKind>,
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.dispatcher.register(kind, listener);
    }

    /// Discover the gateway URL and start the connection.
    ///
    /// Returns once the connection loop is running. Connection churn afterwards is
    /// handled in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if already connected, if discovery fails or if the discovered
    /// URL is invalid.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.gateway.lock().await;
        if slot.as_ref().is_some_and(|gateway| !gateway.is_finished()) {
            return Err(Error::validation("client is already connected"));
        }

        let info = self.rest.gateway().await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %info.url, "discovered gateway");

        let handler = Handler {
            cache: Arc::clone(&self.cache),
            dispatcher: Arc::clone(&self.dispatcher),
        };
        let gateway = Gateway::connect(
            &info.url,
            self.token.clone(),
            self.config.gateway.clone(),
            handler,
        )?;

        *slot = Some(gateway);
        Ok(())
    }

    /// Current gateway phase, `None` before [`connect`](Self::connect).
    pub async fn state(&self) -> Option<Phase> {
        self.gateway.lock().await.as_ref().map(Gateway::state)
    }

    /// Subscribe to gateway phase changes, `None` before [`connect`](Self::connect).
    pub async fn state_receiver(&self) -> Option<watch::Receiver<Phase>> {
        self.gateway
            .lock()
            .await
            .as_ref()
            .map(Gateway::state_receiver)
    }

    /// Close the gateway and wait for running listeners.
    pub async fn shutdown(&self) {
        let gateway = self.gateway.lock().await.take();
        if let Some(gateway) = gateway {
            gateway.shutdown().await;
        }
        self.dispatcher.shutdown().await;
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    #[must_use]
    pub fn rest(&self) -> &rest::Client {
        &self.rest
    }

    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Sink the gateway publishes into: updates the cache, then schedules listeners.
#[derive(Debug)]
struct Handler {
    cache: Arc<Cache>,
    dispatcher: Arc<EventDispatcher>,
}

impl EventSink for Handler {
    fn publish(&self, dispatch: Dispatch) {
        let resolved = self.cache.apply(&dispatch).unwrap_or_else(|e| {
            #[cfg(feature = "tracing")]
            tracing::warn!(event = %dispatch.kind, error = %e, "unable to build domain object");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            Resolved::default()
        });

        let ctx = EventContext::new(dispatch, resolved, Arc::clone(&self.cache));
        self.dispatcher.schedule(ctx);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::gateway::codec::{Envelope, decode};

    fn dispatch(sequence: u64, tag: &str, data: &serde_json::Value) -> Dispatch {
        let frame = json!({"op": 0, "s": sequence, "t": tag, "d": data});
        match decode(frame.to_string().as_bytes()).unwrap() {
            Envelope::Dispatch(dispatch) => dispatch,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();

        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.dispatch_mode, DispatchMode::Concurrent);
        assert_eq!(config.gateway.api_version, crate::API_VERSION);
    }

    #[tokio::test]
    async fn handler_caches_guild_before_listeners_run() {
        let cache = Arc::new(Cache::new());
        let dispatcher = Arc::new(EventDispatcher::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.register(EventKind::GuildCreate, move |ctx| {
            let tx = tx.clone();
            async move {
                let guild = ctx.guild.ok_or("missing guild")?;
                let cached = ctx.cache.guild(guild.id).ok_or("guild not cached")?;
                tx.send(cached.name.clone())?;
                Ok::<(), BoxError>(())
            }
        });

        let handler = Handler {
            cache: Arc::clone(&cache),
            dispatcher: Arc::clone(&dispatcher),
        };
        handler.publish(dispatch(2, "GUILD_CREATE", &json!({"id": "7", "name": "Democord"})));
        dispatcher.shutdown().await;

        assert_eq!(rx.recv().await.as_deref(), Some("Democord"));
        assert_eq!(cache.guild_count(), 1);
    }

    #[tokio::test]
    async fn malformed_body_still_reaches_listeners() {
        let cache = Arc::new(Cache::new());
        let dispatcher = Arc::new(EventDispatcher::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.register(EventKind::GuildCreate, move |ctx| {
            let tx = tx.clone();
            async move {
                tx.send(ctx.guild.is_none())?;
                Ok::<(), BoxError>(())
            }
        });

        let handler = Handler {
            cache: Arc::clone(&cache),
            dispatcher: Arc::clone(&dispatcher),
        };
        handler.publish(dispatch(2, "GUILD_CREATE", &json!({"name": "no id"})));
        dispatcher.shutdown().await;

        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(cache.guild_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_before_connect_is_a_no_op() {
        let client = Client::new(SecretString::from("token"), Config::default()).unwrap();

        assert_eq!(client.state().await, None);
        client.shutdown().await;
    }
}
