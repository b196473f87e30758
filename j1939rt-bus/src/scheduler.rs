use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Opaque handle returned by [`Scheduler::every`]; pass to
/// [`Scheduler::clear`] to cancel that one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Cooperative periodic-timer registry.
///
/// `every` schedules a closure to run approximately every `ms`
/// milliseconds on the current tokio runtime. Delivery is best-effort: no
/// drift compensation is attempted, and a slow tick is simply delayed
/// rather than double-fired.
#[derive(Clone)]
pub struct Scheduler {
    handles: Arc<Mutex<HashMap<u64, Arc<AtomicBool>>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Schedule `f` to run approximately every `ms` milliseconds. Requires
    /// an enclosing tokio runtime context.
    pub fn every(&self, ms: u64, mut f: impl FnMut() + Send + 'static) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.handles.lock().unwrap().insert(id, cancelled.clone());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(ms.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                f();
            }
        });

        TimerHandle(id)
    }

    /// Cancel a single timer. A no-op if it was already cleared.
    pub fn clear(&self, handle: TimerHandle) {
        if let Some(flag) = self.handles.lock().unwrap().remove(&handle.0) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Cancel every outstanding timer.
    pub fn stop_all(&self) {
        for (_, flag) in self.handles.lock().unwrap().drain() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Number of timers currently outstanding. Exposed for tests.
    pub fn active_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timer_fires_approximately_every_interval() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.every(10, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn clear_stops_further_invocations() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = scheduler.every(10, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(25)).await;
        tokio::task::yield_now().await;
        let before = count.load(Ordering::SeqCst);
        assert!(before >= 2);

        scheduler.clear(handle);
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), before);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stop_all_clears_every_handle() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            scheduler.every(10, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.active_count(), 3);

        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;

        scheduler.stop_all();
        assert_eq!(scheduler.active_count(), 0);

        let snapshot = count.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), snapshot);
    }
}
