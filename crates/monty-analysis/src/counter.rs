//! An atomic in-flight counter with asynchronous wait-for-zero.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

/// A non-negative counter tracking in-flight work.
///
/// Increments hand out a scoped release handle whose drop decrements the
/// counter, so the count is released on every exit path, including
/// cancellation.
#[derive(Debug, Default)]
pub struct VolatileCounter {
    /// The current count.
    count: AtomicUsize,
    /// Wakes tasks waiting for the counter to return to zero.
    zero: Notify,
}

impl VolatileCounter {
    /// Constructs a new counter with a count of zero.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the current count.
    pub fn value(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Samples whether the count is currently zero.
    pub fn is_zero(&self) -> bool {
        self.value() == 0
    }

    /// Increments the counter.
    ///
    /// The returned guard decrements the counter when dropped.
    pub fn increment(self: &Arc<Self>) -> CounterGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        CounterGuard {
            counter: self.clone(),
        }
    }

    /// Completes when the count is observed to be zero.
    ///
    /// Completes immediately if the count is already zero.
    pub async fn wait_for_zero(&self) {
        loop {
            let mut notified = pin!(self.zero.notified());
            // Register interest before re-checking so a release between the
            // check and the await is not lost
            notified.as_mut().enable();
            if self.is_zero() {
                return;
            }

            notified.await;
        }
    }
}

/// Scoped release handle returned by [`VolatileCounter::increment`].
#[derive(Debug)]
#[must_use]
pub struct CounterGuard {
    /// The counter to decrement on release.
    counter: Arc<VolatileCounter>,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        if self.counter.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.counter.zero.notify_waiters();
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn it_completes_immediately_when_zero() {
        let counter = Arc::new(VolatileCounter::new());
        assert!(counter.is_zero());
        counter.wait_for_zero().await;
    }

    #[tokio::test]
    async fn it_releases_on_drop() {
        let counter = Arc::new(VolatileCounter::new());
        let first = counter.increment();
        let second = counter.increment();
        assert_eq!(counter.value(), 2);

        drop(first);
        assert_eq!(counter.value(), 1);

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait_for_zero().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should observe zero")
            .unwrap();
        assert!(counter.is_zero());
    }

    #[tokio::test]
    async fn it_is_safe_under_concurrent_release() {
        let counter = Arc::new(VolatileCounter::new());
        let guards: Vec<_> = (0..64).map(|_| counter.increment()).collect();
        let tasks: Vec<_> = guards
            .into_iter()
            .map(|guard| tokio::spawn(async move { drop(guard) }))
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        counter.wait_for_zero().await;
        assert_eq!(counter.value(), 0);
    }
}
