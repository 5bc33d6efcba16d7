//! Timer primitive used by the correlation layer and the idle-expiry loops.
//!
//! Production code drives a [`TokioScheduler`]; tests drive a
//! [`VirtualScheduler`] so timeout and expiry paths never depend on the wall
//! clock.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Opaque handle to a scheduled timer. Cancelling an id that already fired
/// or was already cancelled is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A one-shot or periodic timer source.
///
/// Implementations must guarantee a cancelled timer never fires.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TimerId;

    /// Run `task` every `period`, starting after the first `period` elapses.
    fn schedule_interval(&self, period: Duration, task: BoxedIntervalTask) -> TimerId;

    /// Cancel a one-shot timer. Idempotent.
    fn cancel(&self, id: TimerId);

    /// Cancel a periodic timer. Idempotent.
    fn cancel_interval(&self, id: TimerId);

    /// Cancel every outstanding timer owned by this scheduler.
    async fn dispose(&self);
}

/// A boxed, once-callable async closure run by a one-shot timer.
pub type BoxedTask = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A boxed, repeatedly-callable async closure run by an interval timer.
pub type BoxedIntervalTask = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Production scheduler backed by `tokio::time`.
pub struct TokioScheduler {
    next_id: AtomicU64,
    handles: Mutex<std::collections::HashMap<u64, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Construct an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handles: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TimerId {
        let id = self.next();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });
        // best-effort insert; dropping the lock guard immediately after is fine,
        // a fired timer removes itself lazily on the next cancel/dispose sweep
        if let Ok(mut handles) = self.handles.try_lock() {
            handles.insert(id, handle);
        }
        TimerId(id)
    }

    fn schedule_interval(&self, period: Duration, task: BoxedIntervalTask) -> TimerId {
        let id = self.next();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                task().await;
            }
        });
        if let Ok(mut handles) = self.handles.try_lock() {
            handles.insert(id, handle);
        }
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut handles) = self.handles.try_lock() {
            if let Some(handle) = handles.remove(&id.0) {
                handle.abort();
            }
        }
    }

    fn cancel_interval(&self, id: TimerId) {
        self.cancel(id);
    }

    async fn dispose(&self) {
        let mut handles = self.handles.lock().await;
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }
}

enum VirtualEntry {
    Once(Option<BoxedTask>),
    Interval(BoxedIntervalTask, Duration),
}

struct VirtualTimer {
    fire_at: Duration,
    entry: VirtualEntry,
    cancelled: bool,
}

/// Deterministic scheduler for tests: time only moves when [`VirtualScheduler::advance`]
/// is called, so timeout and idle-expiry paths run without real delay or flakiness.
pub struct VirtualScheduler {
    next_id: AtomicU64,
    now: Mutex<Duration>,
    timers: Mutex<BTreeMap<u64, VirtualTimer>>,
}

impl VirtualScheduler {
    /// Construct a scheduler whose clock starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            now: Mutex::new(Duration::ZERO),
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Move the virtual clock forward by `step`, running every timer whose
    /// deadline falls at or before the new time. Interval timers reschedule
    /// themselves and may fire more than once if `step` spans several periods.
    pub async fn advance(&self, step: Duration) {
        let target = {
            let mut now = self.now.lock().await;
            *now += step;
            *now
        };

        loop {
            let due_id = {
                let timers = self.timers.lock().await;
                timers
                    .iter()
                    .filter(|(_, t)| !t.cancelled && t.fire_at <= target)
                    .min_by_key(|(_, t)| t.fire_at)
                    .map(|(id, _)| *id)
            };
            let Some(id) = due_id else { break };

            let ran = {
                let mut timers = self.timers.lock().await;
                let Some(timer) = timers.get_mut(&id) else { continue };
                if timer.cancelled {
                    timers.remove(&id);
                    continue;
                }
                match &mut timer.entry {
                    VirtualEntry::Once(task) => {
                        let task = task.take();
                        timers.remove(&id);
                        task.map(|t| Box::pin(t()) as Pin<Box<dyn Future<Output = ()> + Send>>)
                    }
                    VirtualEntry::Interval(task, period) => {
                        let fut = task();
                        timer.fire_at += *period;
                        Some(Box::pin(fut) as Pin<Box<dyn Future<Output = ()> + Send>>)
                    }
                }
            };

            if let Some(fut) = ran {
                fut.await;
            }
        }
    }

    /// Current virtual time since the scheduler was constructed.
    pub async fn now(&self) -> Duration {
        *self.now.lock().await
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for VirtualScheduler {
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TimerId {
        let id = self.next();
        let fire_at = self.now.try_lock().map(|n| *n + delay).unwrap_or(delay);
        if let Ok(mut timers) = self.timers.try_lock() {
            timers.insert(
                id,
                VirtualTimer {
                    fire_at,
                    entry: VirtualEntry::Once(Some(task)),
                    cancelled: false,
                },
            );
        }
        TimerId(id)
    }

    fn schedule_interval(&self, period: Duration, task: BoxedIntervalTask) -> TimerId {
        let id = self.next();
        let fire_at = self.now.try_lock().map(|n| *n + period).unwrap_or(period);
        if let Ok(mut timers) = self.timers.try_lock() {
            timers.insert(
                id,
                VirtualTimer {
                    fire_at,
                    entry: VirtualEntry::Interval(task, period),
                    cancelled: false,
                },
            );
        }
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut timers) = self.timers.try_lock() {
            if let Some(timer) = timers.get_mut(&id.0) {
                timer.cancelled = true;
            }
        }
    }

    fn cancel_interval(&self, id: TimerId) {
        self.cancel(id);
    }

    async fn dispose(&self) {
        let mut timers = self.timers.lock().await;
        for (_, timer) in timers.iter_mut() {
            timer.cancelled = true;
        }
        timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn schedule_fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let id = scheduler.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        scheduler.cancel(id);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dispose_cancels_everything() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        scheduler.dispose().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn virtual_scheduler_fires_only_after_advance() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler.schedule(
            Duration::from_millis(30_000),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        scheduler.advance(Duration::from_millis(10_000)).await;
        assert!(!fired.load(Ordering::SeqCst));
        scheduler.advance(Duration::from_millis(20_000)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn virtual_scheduler_cancel_prevents_fire() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let id = scheduler.schedule(
            Duration::from_millis(1_000),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        scheduler.cancel(id);
        scheduler.advance(Duration::from_millis(5_000)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn virtual_scheduler_interval_fires_repeatedly() {
        let scheduler = VirtualScheduler::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        scheduler.schedule_interval(
            Duration::from_millis(1_000),
            Box::new(move || {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        scheduler.advance(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
