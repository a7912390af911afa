//! Listener registry and invocation.
//!
//! Listeners are async callbacks keyed by [`EventKind`]. Every listener for an event runs
//! on its own task, so one that errors or panics never affects the others or the
//! connection. [`EventDispatcher::schedule`] is what the read loop uses: it only spawns
//! work and returns.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::task::TaskTracker;

use crate::cache::{Cache, Resolved};
use crate::error::BoxError;
use crate::gateway::codec::{Dispatch, EventKind};
use crate::models::{Guild, User};

/// Future returned by a listener.
pub type ListenerFuture = BoxFuture<'static, Result<(), BoxError>>;

type Listener = Arc<dyn Fn(EventContext) -> ListenerFuture + Send + Sync>;

/// Everything a listener receives about one event.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct EventContext {
    pub kind: EventKind,
    pub sequence: u64,
    /// Raw event body
    pub data: Arc<Value>,
    /// Guild built from the body, for guild events
    pub guild: Option<Arc<Guild>>,
    /// User built from the body, for READY and USER_UPDATE
    pub user: Option<Arc<User>>,
    pub cache: Arc<Cache>,
}

impl EventContext {
    #[must_use]
    pub fn new(dispatch: Dispatch, resolved: Resolved, cache: Arc<Cache>) -> Self {
        Self {
            kind: dispatch.kind,
            sequence: dispatch.sequence,
            data: Arc::new(dispatch.data),
            guild: resolved.guild,
            user: resolved.user,
            cache,
        }
    }
}

/// How events are ordered relative to each other.
///
/// Listeners of the same event always run concurrently.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Each event's listeners start as soon as the event arrives
    #[default]
    Concurrent,
    /// An event's listeners start after the previous event's listeners have finished
    Sequential,
}

/// Outcome of dispatching one event.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that were started
    pub invoked: usize,
    /// Listeners that returned an error or panicked
    pub failed: usize,
}

pub struct EventDispatcher {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
    mode: DispatchMode,
    tracker: TaskTracker,
    /// Last scheduled event, awaited by the next one in sequential mode
    last: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum::<usize>();

        f.debug_struct("EventDispatcher")
            .field("listeners", &listeners)
            .field("mode", &self.mode)
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchMode::default())
    }
}

impl EventDispatcher {
    /// Create a dispatcher with no-op listeners for the built-in lifecycle events.
    #[must_use]
    pub fn new(mode: DispatchMode) -> Self {
        let dispatcher = Self {
            listeners: RwLock::new(HashMap::new()),
            mode,
            tracker: TaskTracker::new(),
            last: Mutex::new(None),
        };

        dispatcher.register(EventKind::Ready, noop);
        dispatcher.register(EventKind::GuildCreate, noop);
        dispatcher
    }

    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Add a listener. Registering the same callback twice runs it twice.
    pub fn register<K, F, Fut>(&self, kind: K, listener: F)
    where
        K: Into<EventKind>,
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |ctx| -> ListenerFuture { Box::pin(listener(ctx)) });

        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind.into())
            .or_default()
            .push(listener);
    }

    #[must_use]
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// Run every listener for `ctx.kind` concurrently and wait for all of them.
    pub async fn dispatch(&self, ctx: EventContext) -> DispatchReport {
        run(self.snapshot(&ctx.kind), ctx).await
    }

    /// Start the listeners for `ctx.kind` in the background and return immediately.
    pub fn schedule(&self, ctx: EventContext) {
        let listeners = self.snapshot(&ctx.kind);
        if listeners.is_empty() {
            return;
        }

        match self.mode {
            DispatchMode::Concurrent => {
                self.tracker.spawn(async move {
                    run(listeners, ctx).await;
                });
            }
            DispatchMode::Sequential => {
                let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
                let previous = last.take();

                *last = Some(self.tracker.spawn(async move {
                    if let Some(previous) = previous {
                        _ = previous.await;
                    }
                    run(listeners, ctx).await;
                }));
            }
        }
    }

    /// Wait for every scheduled listener to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn snapshot(&self, kind: &EventKind) -> Vec<Listener> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }
}

async fn noop(_: EventContext) -> Result<(), BoxError> {
    Ok(())
}

async fn run(listeners: Vec<Listener>, ctx: EventContext) -> DispatchReport {
    let mut report = DispatchReport {
        invoked: listeners.len(),
        failed: 0,
    };
    if listeners.is_empty() {
        return report;
    }

    let mut set = JoinSet::new();
    for listener in listeners {
        set.spawn(listener(ctx.clone()));
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                report.failed += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(event = %ctx.kind, seq = ctx.sequence, error = %e, "listener failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
            Err(e) => {
                report.failed += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(event = %ctx.kind, seq = ctx.sequence, error = %e, "listener panicked");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    report
}
