//! Debounced cache invalidation.
//!
//! Bursts of "something changed" signals (several instruments added in a
//! tight loop) collapse into a single rescan. Every [`notify`] re-arms a
//! short window; the scan fires when the window lapses or when the maximum
//! delay since the first unserved notification is reached, whichever comes
//! first. The scan always runs on a spawned task, never on the notifier's
//! stack, because it usually calls back into code that notifies again.
//!
//! [`notify`]: DebouncedCacheInvalidator::notify

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{MetricsError, Result};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

type ScanFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ScanFn = Arc<dyn Fn() -> ScanFuture + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Pending {
    first: Instant,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct State {
    pending: Option<Pending>,
    worker_running: bool,
}

struct Inner {
    name: String,
    window: Duration,
    max_delay: Duration,
    state: Mutex<State>,
    wake: Notify,
    scan: ScanFn,
    scans: AtomicU64,
}

/// Cheap to clone; clones share one pending scan.
#[derive(Clone)]
pub struct DebouncedCacheInvalidator {
    inner: Arc<Inner>,
    handle: Handle,
}

impl DebouncedCacheInvalidator {
    /// Create an invalidator on the current tokio runtime.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        window: Duration,
        max_delay: Duration,
        scan: F,
    ) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|e| {
            MetricsError::config(format!("debounced invalidator needs a tokio runtime: {}", e))
        })?;
        Ok(Self::with_handle(handle, name, window, max_delay, scan))
    }

    /// Create an invalidator whose scans run on `handle`. `notify` may then
    /// be called from any thread.
    pub fn with_handle<F, Fut>(
        handle: Handle,
        name: impl Into<String>,
        window: Duration,
        max_delay: Duration,
        scan: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scan: ScanFn = Arc::new(move || Box::pin(scan()) as ScanFuture);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                window,
                max_delay: max_delay.max(window),
                state: Mutex::new(State::default()),
                wake: Notify::new(),
                scan,
                scans: AtomicU64::new(0),
            }),
            handle,
        }
    }

    /// Schedule a rescan, or push the pending one back by one window.
    pub fn notify(&self) {
        let now = Instant::now();
        let spawn_worker = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            let window_end = now + self.inner.window;
            state.pending = Some(match state.pending {
                Some(p) => Pending {
                    first: p.first,
                    deadline: window_end.min(p.first + self.inner.max_delay),
                },
                None => Pending { first: now, deadline: window_end },
            });
            !std::mem::replace(&mut state.worker_running, true)
        };

        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            self.handle.spawn(worker(inner));
        } else {
            self.inner.wake.notify_one();
        }
    }

    /// True while a scan is scheduled but has not started.
    pub fn is_pending(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_some()
    }

    /// Number of scans run so far.
    pub fn scan_count(&self) -> u64 {
        self.inner.scans.load(Ordering::Relaxed)
    }
}

async fn worker(inner: Arc<Inner>) {
    loop {
        let deadline = {
            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.pending {
                Some(p) => p.deadline,
                None => {
                    state.worker_running = false;
                    return;
                }
            }
        };

        tokio::select! {
            _ = time::sleep_until(deadline) => {}
            // Re-armed; recompute the deadline.
            _ = inner.wake.notified() => continue,
        }

        let due = {
            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.pending {
                Some(p) if p.deadline <= Instant::now() => {
                    state.pending = None;
                    Some(p)
                }
                _ => None,
            }
        };
        let Some(served) = due else { continue };

        let n = inner.scans.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            invalidator = %inner.name,
            scan = n,
            waited_ms = served.first.elapsed().as_millis() as u64,
            "Running debounced rescan"
        );
        // Notifications arriving from here on set a new pending entry,
        // which this loop serves with exactly one more scan.
        (inner.scan)().await;
    }
}
