//! Worker-thread plumbing shared by the transports.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use groundlink_hal::HalError;
use tracing::{debug, warn};

use crate::error::Result;

/// Upper bound on the part of a shutdown timeout kept back for stopping workers.
const STOP_GRACE: Duration = Duration::from_millis(250);

/// A shutdown that must finish within one overall timeout.
///
/// The drain phase gets what is left after reserving the stop grace (at most
/// half the timeout); worker joins share whatever remains after that.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShutdownDeadline {
    drain_until: Instant,
    deadline: Instant,
}

impl ShutdownDeadline {
    pub(crate) fn start(timeout: Duration) -> Self {
        let now = Instant::now();
        let grace = STOP_GRACE.min(timeout / 2);
        Self {
            drain_until: now + (timeout - grace),
            deadline: now + timeout,
        }
    }

    /// Time left for draining queued output.
    pub(crate) fn drain_left(&self) -> Duration {
        self.drain_until.saturating_duration_since(Instant::now())
    }

    /// Time left before the whole shutdown must be done.
    pub(crate) fn left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub(crate) fn passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Join every worker within the time left.
    pub(crate) fn join_all(&self, workers: impl IntoIterator<Item = JoinHandle<()>>) {
        for handle in workers {
            join_with_timeout(handle, self.left());
        }
    }
}

/// Lock a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn a named worker thread.
pub(crate) fn spawn<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(HalError::Io)?;
    debug!(worker = name, "worker started");
    Ok(handle)
}

/// Join `handle`, giving up after `timeout`.
///
/// Returns `false` if the worker was still running at the deadline; it is then
/// left detached.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(worker = %name, ?timeout, "worker did not stop in time, detaching");
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    if handle.join().is_err() {
        warn!(worker = %name, "worker panicked");
    } else {
        debug!(worker = %name, "worker stopped");
    }
    true
}
