//! Seam between the read loop and whatever consumes dispatches.

use tokio::sync::mpsc;

use super::codec::Dispatch;

/// Receiver of decoded dispatches.
///
/// [`publish`](EventSink::publish) is called from the read loop, so implementations must
/// only schedule work and return. Blocking here stalls heartbeats.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventSink for Printer {
///     fn publish(&self, dispatch: Dispatch) {
///         tokio::spawn(async move { println!("{}", dispatch.kind) });
///     }
/// }
/// ```
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, dispatch: Dispatch);
}

impl EventSink for mpsc::UnboundedSender<Dispatch> {
    fn publish(&self, dispatch: Dispatch) {
        if let Err(e) = self.send(dispatch) {
            #[cfg(feature = "tracing")]
            tracing::debug!(kind = %e.0.kind, "event receiver dropped, discarding dispatch");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
