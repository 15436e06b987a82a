use dashmap::DashMap;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{error, trace};

use crate::error::{Error, Result};

/// Fixed-size pool for work the control loop must not wait on.
///
/// Tasks are tracked until they finish (or panic) so shutdown can drain them
/// with [`WorkerPool::wait_idle`].
pub struct WorkerPool {
    name: String,
    pool: ThreadPool,
    tracker: Arc<Tracker>,
    next_id: AtomicU64,
}

struct Tracker {
    in_flight: DashMap<u64, String>,
    pending: Mutex<usize>,
    idle: Condvar,
}

/// Removes the task from the tracker on drop, including during unwinding.
struct Finished {
    id: u64,
    tracker: Arc<Tracker>,
}

impl Drop for Finished {
    fn drop(&mut self) {
        self.tracker.in_flight.remove(&self.id);
        let mut pending = match self.tracker.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.tracker.idle.notify_all();
        }
    }
}

/// Completion notification for a spawned task. Dropping it detaches the task.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes. `None` if the task panicked.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let thread_prefix = name.to_string();
        let panic_name = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .panic_handler(move |_| error!("A '{}' worker task panicked", panic_name))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build '{}' pool: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            pool,
            tracker: Arc::new(Tracker {
                in_flight: DashMap::new(),
                pending: Mutex::new(0),
                idle: Condvar::new(),
            }),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn spawn<T, F>(&self, label: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        trace!("Dispatching '{}' on '{}' pool", label, self.name);

        self.tracker.in_flight.insert(id, label);
        {
            let mut pending = match self.tracker.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *pending += 1;
        }

        let (tx, rx) = mpsc::channel();
        let finished = Finished {
            id,
            tracker: self.tracker.clone(),
        };
        self.pool.spawn(move || {
            let _finished = finished;
            let _ = tx.send(task());
        });

        TaskHandle { rx }
    }

    /// Labels of tasks dispatched but not yet finished.
    pub fn in_flight(&self) -> Vec<String> {
        self.tracker
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        match self.tracker.pending.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until every dispatched task has finished.
    pub fn wait_idle(&self) {
        let mut pending = match self.tracker.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *pending > 0 {
            pending = match self.tracker.idle.wait(pending) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_task_handle_returns_result() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let handle = pool.spawn("add", || 2 + 2);
        assert_eq!(handle.wait(), Some(4));
    }

    #[test]
    fn test_wait_idle_drains_detached_tasks() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            let done = done.clone();
            pool.spawn(format!("task-{}", i), move || {
                std::thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle();
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(pool.pending(), 0);
        assert!(pool.in_flight().is_empty());
    }

    #[test]
    fn test_panicking_task_is_untracked() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool.spawn("boom", || -> u32 { panic!("boom") });
        assert_eq!(handle.wait(), None);
        pool.wait_idle();
        assert_eq!(pool.pending(), 0);
    }
}
