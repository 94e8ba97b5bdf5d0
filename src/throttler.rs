//! Per-site rate limiter pacing requests to a minimum inter-request interval.
//!
//! Grounded on `original_source/pystemon/throttler.py`'s `ThreadThrottler`:
//! a FIFO permit dispenser where one waiter is released, then the dispenser
//! sleeps the configured interval before releasing the next. The async
//! rendition swaps the thread+`Queue` combination for a `tokio::sync::Mutex`
//! guarding a monotonic "next permit at" instant, which preserves FIFO order
//! and release-then-sleep semantics without a dedicated background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Paces callers to one permit every `interval`. Constructing with a zero
/// interval is the caller's signal that throttling is disabled for a site
/// (`spec.md` §4.2); callers should avoid constructing a `Throttler` at all
/// in that case rather than relying on a zero-duration wait.
pub struct Throttler {
    interval: Duration,
    next_permit_at: Mutex<Instant>,
    stopped: AtomicBool,
}

impl Throttler {
    /// Creates a throttler granting one permit every `interval_millis` ms.
    #[must_use]
    pub fn new(interval_millis: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_millis),
            next_permit_at: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Blocks until granted a permit, then arms the next permit to be
    /// available `interval` later. Waiters are served FIFO because the
    /// mutex itself queues them in lock-acquisition order.
    pub async fn wait(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut next_permit_at = self.next_permit_at.lock().await;
        let now = Instant::now();
        if *next_permit_at > now {
            tokio::time::sleep_until(*next_permit_at).await;
        }
        *next_permit_at = Instant::now() + self.interval;
    }

    /// Releases any future waiters immediately instead of leaving them
    /// blocked forever.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_spaces_permits_by_interval() {
        let throttler = Arc::new(Throttler::new(100));
        let start = Instant::now();

        throttler.wait().await;
        let first = Instant::now();
        assert!(first.duration_since(start) < Duration::from_millis(10));

        throttler.wait().await;
        let second = Instant::now();
        assert!(second.duration_since(first) >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_served_in_order() {
        let throttler = Arc::new(Throttler::new(50));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..3 {
            let throttler = Arc::clone(&throttler);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                throttler.wait().await;
                order.lock().await.push(id);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_stop_releases_waiters_immediately() {
        let throttler = Throttler::new(60_000);
        throttler.wait().await;
        throttler.stop();
        let result = tokio::time::timeout(Duration::from_millis(50), throttler.wait()).await;
        assert!(result.is_ok(), "stopped throttler must not block waiters");
    }
}
