//! FIFO exclusive section guarding the history list

use log::debug;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-wide async lock.
///
/// `tokio::sync::Mutex` queues waiters fairly, so the section is granted in
/// arrival order. Cloning shares the same lock.
#[derive(Clone, Default)]
pub struct HistoryLock {
    inner: Arc<Mutex<()>>,
}

/// One-shot release capability returned by [`HistoryLock::acquire`].
///
/// The section is released exactly once, either by [`release`](Self::release)
/// or when the guard is dropped.
#[must_use = "the section is released as soon as the guard is dropped"]
pub struct HistoryGuard {
    _guard: OwnedMutexGuard<()>,
}

impl HistoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for every earlier caller to release, then enter the section
    pub async fn acquire(&self) -> HistoryGuard {
        let guard = self.inner.clone().lock_owned().await;
        debug!("history lock acquired");
        HistoryGuard { _guard: guard }
    }
}

impl HistoryGuard {
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryLock;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn grants_waiters_in_arrival_order() {
        let lock = HistoryLock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = lock.acquire().await;

        let mut waiters = Vec::new();
        for n in 0..5 {
            let lock = lock.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                let guard = lock.acquire().await;
                order.lock().unwrap().push(n);
                tokio::time::sleep(Duration::from_millis(1)).await;
                guard.release();
            }));
            // let each waiter enqueue before spawning the next one
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        first.release();
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropping_the_guard_releases_the_section() {
        let lock = HistoryLock::new();
        {
            let _guard = lock.acquire().await;
        }
        let again = tokio::time::timeout(Duration::from_secs(1), lock.acquire()).await;
        assert!(again.is_ok());
    }
}
