//! A virtualizable clock (C1).
//!
//! Three implementations share one contract: `now()`, `sleep`, a one-shot
//! `after` and a cancellable `schedule`. Timer ordering is by fire-instant
//! with FIFO tie-breaking; a cancelled timer must never fire even if
//! cancellation races with `advance`.
//!
//! The virtual clock's timer queue is structured like
//! `ringrtc::simnet::actor::Actor`'s `BinaryHeap<Task<State>>` of delayed
//! tasks ordered by deadline, but expressed with `tokio::sync::oneshot` +
//! callbacks instead of a dedicated OS thread per actor, since the engine
//! already runs each call on its own `tokio` task.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant as TokioInstant;

/// A point in (possibly virtual) time. Wraps `tokio::time::Instant` so
/// wall-clock and virtual clocks interoperate with `tokio::time` APIs.
pub type Instant = TokioInstant;

type Callback = Box<dyn FnOnce(Instant) + Send>;

/// A handle to a scheduled, cancellable timer.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }
}

#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Resolves once at least `d` of (possibly virtual) time has passed.
    async fn sleep(&self, d: Duration);

    /// Like `sleep`, but returns a receiver immediately so the caller can
    /// `select!` on it alongside other channels.
    fn after(&self, d: Duration) -> oneshot::Receiver<Instant>;

    /// Schedules `callback` to run once `d` has passed; returns a handle
    /// that can cancel it before it fires.
    fn schedule(&self, d: Duration, callback: Callback) -> TimerHandle;
}

/// Pass-through to the platform clock.
#[derive(Default)]
pub struct WallClock;

#[async_trait::async_trait]
impl Clock for WallClock {
    fn now(&self) -> Instant {
        TokioInstant::now()
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }

    fn after(&self, d: Duration) -> oneshot::Receiver<Instant> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(d).await;
            let _ = tx.send(TokioInstant::now());
        });
        rx
    }

    fn schedule(&self, d: Duration, callback: Callback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_for_task = cancelled.clone();
        tokio::spawn(async move {
            tokio::time::sleep(d).await;
            if !cancelled_for_task.load(AtomicOrdering::SeqCst) {
                callback(TokioInstant::now());
            }
        });
        TimerHandle { cancelled }
    }
}

struct PendingTimer {
    fire_at: Instant,
    sequence: u64,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

impl PartialEq for PendingTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}
impl Eq for PendingTimer {}

impl Ord for PendingTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest fire_at (and then
        // the lowest sequence number) to pop first, so reverse both.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for PendingTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct VirtualState {
    now: Instant,
    timers: BinaryHeap<PendingTimer>,
}

/// A clock entirely driven by [`VirtualClock::advance`]; never moves on
/// its own.
pub struct VirtualClock {
    state: Mutex<VirtualState>,
    sequence: AtomicU64,
}

impl VirtualClock {
    /// `tokio::time::Instant` has no public "from arbitrary epoch"
    /// constructor, so the virtual origin is simply "whenever the process
    /// paused `tokio::time`"; tests that need a specific wall-clock label
    /// (e.g. 2024-01-01T00:00Z) should pair this with
    /// `tokio::time::pause()` and treat `now()` as an opaque basis, using
    /// `elapsed_since_start()` for assertions instead of absolute dates.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VirtualState {
                now: TokioInstant::now(),
                timers: BinaryHeap::new(),
            }),
            sequence: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `d`, firing (in fire-instant, then
    /// FIFO, order) every timer now due. Callbacks run after the lock is
    /// released, so a callback that itself registers a new timer cannot
    /// deadlock against `advance`.
    pub fn advance(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        let mut due = Vec::new();
        {
            let mut state = self.state.lock();
            state.now += d;
            let now = state.now;
            while let Some(top) = state.timers.peek() {
                if top.fire_at > now {
                    break;
                }
                due.push(state.timers.pop().expect("just peeked"));
            }
        }
        for timer in due {
            if !timer.cancelled.load(AtomicOrdering::SeqCst) {
                let fire_at = timer.fire_at;
                (timer.callback)(fire_at);
            }
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    async fn sleep(&self, d: Duration) {
        let rx = self.after(d);
        let _ = rx.await;
    }

    fn after(&self, d: Duration) -> oneshot::Receiver<Instant> {
        let (tx, rx) = oneshot::channel();
        self.schedule(d, Box::new(move |at| {
            let _ = tx.send(at);
        }));
        rx
    }

    fn schedule(&self, d: Duration, callback: Callback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let mut state = self.state.lock();
        let fire_at = state.now + d;
        state.timers.push(PendingTimer {
            fire_at,
            sequence,
            cancelled: cancelled.clone(),
            callback,
        });
        TimerHandle { cancelled }
    }
}

/// Tracks wall-clock deltas and periodically applies them to an inner
/// [`VirtualClock`]; also exposes `advance` directly so tests can
/// fast-forward on top of real elapsed time.
pub struct HybridClock {
    inner: Arc<VirtualClock>,
}

const SYNC_PERIOD: Duration = Duration::from_millis(10);

impl HybridClock {
    pub fn spawn() -> Arc<Self> {
        let inner = Arc::new(VirtualClock::new());
        let hybrid = Arc::new(Self {
            inner: inner.clone(),
        });
        let sync_target = inner;
        tokio::spawn(async move {
            let mut last = TokioInstant::now();
            loop {
                tokio::time::sleep(SYNC_PERIOD).await;
                let now = TokioInstant::now();
                let delta = now.saturating_duration_since(last);
                last = now;
                sync_target.advance(delta);
            }
        });
        hybrid
    }

    pub fn advance(&self, d: Duration) {
        self.inner.advance(d);
    }
}

#[async_trait::async_trait]
impl Clock for HybridClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    async fn sleep(&self, d: Duration) {
        self.inner.sleep(d).await;
    }

    fn after(&self, d: Duration) -> oneshot::Receiver<Instant> {
        self.inner.after(d)
    }

    fn schedule(&self, d: Duration, callback: Callback) -> TimerHandle {
        self.inner.schedule(d, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn advance_fires_due_timers_in_fire_instant_order() {
        let clock = VirtualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        clock.schedule(Duration::from_secs(5), Box::new(move |_| o1.lock().push("5s")));
        let o2 = order.clone();
        clock.schedule(Duration::from_secs(2), Box::new(move |_| o2.lock().push("2s")));

        clock.advance(Duration::from_secs(3));
        assert_eq!(*order.lock(), vec!["2s"]);

        clock.advance(Duration::from_secs(3));
        assert_eq!(*order.lock(), vec!["2s", "5s"]);
    }

    #[test]
    fn split_advance_matches_combined_advance() {
        let a = VirtualClock::new();
        let b = VirtualClock::new();
        let log_a = Arc::new(Mutex::new(Vec::new()));
        let log_b = Arc::new(Mutex::new(Vec::new()));

        for secs in [1u64, 2, 3, 7] {
            let la = log_a.clone();
            a.schedule(Duration::from_secs(secs), Box::new(move |_| la.lock().push(secs)));
            let lb = log_b.clone();
            b.schedule(Duration::from_secs(secs), Box::new(move |_| lb.lock().push(secs)));
        }

        a.advance(Duration::from_secs(4));
        a.advance(Duration::from_secs(4));

        b.advance(Duration::from_secs(8));

        assert_eq!(*log_a.lock(), *log_b.lock());
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let clock = VirtualClock::new();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let handle = clock.schedule(Duration::from_secs(1), Box::new(move |_| {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        handle.cancel();
        clock.advance(Duration::from_secs(2));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn after_resolves_on_advance() {
        let clock = VirtualClock::new();
        let rx = clock.after(Duration::from_secs(1));
        clock.advance(Duration::from_secs(1));
        assert!(rx.await.is_ok());
    }
}
