//! Heartbeat timer and zombie detection.
//!
//! The timer task never touches the transport. Each tick it asks the read loop to send a
//! heartbeat through [`HeartbeatSignal::Beat`], or reports [`HeartbeatSignal::Zombied`]
//! when the previous beat is still unacknowledged and then stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Messages from the timer task to the read loop.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// Send a heartbeat now
    Beat,
    /// The last heartbeat was never acknowledged
    Zombied,
}

/// Ack flag shared between the timer task and the read loop.
///
/// Only the timer arms it. Heartbeats sent on server request do not.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    ack_pending: AtomicBool,
}

impl HeartbeatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Any inbound message counts as liveness.
    pub fn acknowledge(&self) {
        self.ack_pending.store(false, Ordering::Release);
    }

    fn mark_sent(&self) {
        self.ack_pending.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_ack_pending(&self) -> bool {
        self.ack_pending.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.ack_pending.store(false, Ordering::Release);
    }
}

/// Delay before the first heartbeat, uniformly drawn from `[0, interval)`.
pub fn jittered_delay<R: rand::Rng + ?Sized>(interval: Duration, rng: &mut R) -> Duration {
    let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..millis))
}

/// Handle to a running heartbeat timer.
#[derive(Debug)]
pub struct Heartbeater {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeater {
    /// Start a timer whose first beat is jittered within `[0, interval)`.
    #[must_use]
    pub fn start(
        interval: Duration,
        state: Arc<HeartbeatState>,
        signals: mpsc::UnboundedSender<HeartbeatSignal>,
        parent: &CancellationToken,
    ) -> Self {
        let first = jittered_delay(interval, &mut rand::rng());
        Self::start_with_delay(interval, first, state, signals, parent)
    }

    #[must_use]
    pub fn start_with_delay(
        interval: Duration,
        first: Duration,
        state: Arc<HeartbeatState>,
        signals: mpsc::UnboundedSender<HeartbeatSignal>,
        parent: &CancellationToken,
    ) -> Self {
        state.reset();
        let token = parent.child_token();
        let task_token = token.clone();

        #[cfg(feature = "tracing")]
        tracing::debug!(?interval, ?first, "starting heartbeat timer");

        let handle = tokio::spawn(async move {
            run(interval, first, &state, &signals, &task_token).await;
        });

        Self { token, handle }
    }

    /// Cancel the timer and wait until it can no longer emit signals.
    pub async fn stop(self) {
        self.token.cancel();
        _ = self.handle.await;
    }
}

async fn run(
    period: Duration,
    first: Duration,
    state: &HeartbeatState,
    signals: &mpsc::UnboundedSender<HeartbeatSignal>,
    token: &CancellationToken,
) {
    if period.is_zero() {
        // interval_at panics on a zero period
        _ = signals.send(HeartbeatSignal::Zombied);
        return;
    }

    let mut ticker = interval_at(Instant::now() + first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if state.is_ack_pending() {
            #[cfg(feature = "tracing")]
            tracing::warn!(?period, "heartbeat was not acknowledged, connection is zombied");
            _ = signals.send(HeartbeatSignal::Zombied);
            break;
        }

        state.mark_sent();
        if signals.send(HeartbeatSignal::Beat).is_err() {
            // Read loop has terminated
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    use super::*;

    const INTERVAL: Duration = Duration::from_millis(41250);

    fn channel() -> (
        mpsc::UnboundedSender<HeartbeatSignal>,
        mpsc::UnboundedReceiver<HeartbeatSignal>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn jitter_is_within_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let delay = jittered_delay(INTERVAL, &mut rng);
            assert!(delay < INTERVAL, "{delay:?} is not below {INTERVAL:?}");
        }
        assert_eq!(jittered_delay(Duration::ZERO, &mut rng), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_beat_after_jitter_then_every_interval() {
        let state = Arc::new(HeartbeatState::new());
        let (tx, mut rx) = channel();
        let parent = CancellationToken::new();
        let first = Duration::from_millis(1234);

        let start = Instant::now();
        let heartbeater =
            Heartbeater::start_with_delay(INTERVAL, first, Arc::clone(&state), tx, &parent);

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Beat));
        assert_eq!(start.elapsed(), first);
        state.acknowledge();

        for n in 1..=3_u32 {
            assert_eq!(rx.recv().await, Some(HeartbeatSignal::Beat));
            assert_eq!(start.elapsed(), first + INTERVAL * n);
            state.acknowledge();
        }

        heartbeater.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ack_does_not_shift_schedule() {
        let state = Arc::new(HeartbeatState::new());
        let (tx, mut rx) = channel();
        let parent = CancellationToken::new();

        let start = Instant::now();
        let heartbeater =
            Heartbeater::start_with_delay(INTERVAL, Duration::ZERO, Arc::clone(&state), tx, &parent);

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Beat));
        tokio::time::sleep(Duration::from_secs(30)).await;
        state.acknowledge();

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Beat));
        assert_eq!(start.elapsed(), INTERVAL);

        heartbeater.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_zombies_exactly_once() {
        let state = Arc::new(HeartbeatState::new());
        let (tx, mut rx) = channel();
        let parent = CancellationToken::new();

        let heartbeater =
            Heartbeater::start_with_delay(INTERVAL, Duration::ZERO, Arc::clone(&state), tx, &parent);

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Beat));
        assert!(state.is_ack_pending());

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Zombied));
        // The task has exited and dropped its sender
        assert_eq!(rx.recv().await, None);
        heartbeater.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_sends_nothing() {
        let state = Arc::new(HeartbeatState::new());
        let (tx, mut rx) = channel();
        let parent = CancellationToken::new();

        let heartbeater = Heartbeater::start_with_delay(
            INTERVAL,
            Duration::from_secs(1),
            Arc::clone(&state),
            tx,
            &parent,
        );
        parent.cancel();
        heartbeater.stop().await;

        assert_eq!(rx.recv().await, None);
        assert!(!state.is_ack_pending());
    }

    #[test]
    fn any_message_clears_pending() {
        let state = HeartbeatState::new();
        state.mark_sent();
        assert!(state.is_ack_pending());
        state.acknowledge();
        assert!(!state.is_ack_pending());
    }
}
