use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lock_api::{GetThreadId, RawMutex};
use parking_lot::WaitTimeoutResult;

use crate::condvar::WakeSet;
use crate::{StopCallback, StopToken};

/// A lock whose guard can step aside for the duration of a closure.
///
/// [`CondvarAny`] uses this to release the caller's lock around the actual
/// sleep. Implementations are provided for the `lock_api` guard types, which
/// covers every `parking_lot` mutex, the reentrant one included.
pub trait Unlock {
    /// Runs `f` with the lock released, reacquiring it before returning.
    fn unlocked<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U;
}

impl<'a, R: RawMutex + 'a, T: ?Sized + 'a> Unlock for lock_api::MutexGuard<'a, R, T> {
    fn unlocked<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        lock_api::MutexGuard::unlocked(self, f)
    }
}

impl<'a, R: RawMutex + 'a, G: GetThreadId + 'a, T: ?Sized + 'a> Unlock
    for lock_api::ReentrantMutexGuard<'a, R, G, T>
{
    fn unlocked<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        lock_api::ReentrantMutexGuard::unlocked(self, f)
    }
}

/// The interruptible condition variable for arbitrary lockables.
///
/// Where [`Condvar`](crate::Condvar) is tied to `parking_lot::Mutex`,
/// `CondvarAny` works with any guard implementing [`Unlock`]. An internal
/// mutex serialises every notification against every waiter's check-and-sleep
/// transition, closing the lost-wakeup window that would otherwise exist
/// because the caller's lock and the condition variable's own lock are
/// distinct. That internal state is reference-counted and shared with any
/// in-flight stop callback, so a notification racing the condition variable's
/// teardown never touches freed memory.
///
/// The condition receives the guard itself; dereference it to reach the
/// protected data.
///
/// # Example:
///
/// ```
/// use parking_lot::ReentrantMutex;
/// use std::cell::Cell;
/// use std::time::Duration;
/// use stop_thread::{CondvarAny, StopSource};
///
/// let source = StopSource::new();
/// let slot = ReentrantMutex::new(Cell::new(0u32));
/// let condvar = CondvarAny::new();
///
/// let mut guard = slot.lock();
/// let ready = condvar.wait_for_or_stop(
///     &mut guard,
///     &source.token(),
///     Duration::from_millis(20),
///     |slot| slot.get() > 0,
/// );
/// assert!(!ready);
/// ```
pub struct CondvarAny {
    shared: Arc<WakeSet>,
}

impl CondvarAny {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(WakeSet::new()),
        }
    }

    /// Wakes one waiter.
    pub fn notify_one(&self) {
        self.shared.notify_one();
    }

    /// Wakes every waiter.
    pub fn notify_all(&self) {
        self.shared.notify_all();
    }

    /// Blocks until notified.
    ///
    /// The caller's lock is released while waiting and reacquired before
    /// returning. Spurious wakeups are possible; callers re-check their
    /// condition.
    pub fn wait<G: Unlock>(&self, guard: &mut G) {
        let mut serial = self.shared.serial.lock();
        guard.unlocked(move || {
            self.shared.condvar.wait(&mut serial);
        });
    }

    /// Blocks until notified or `deadline` passes.
    pub fn wait_until<G: Unlock>(&self, guard: &mut G, deadline: Instant) -> WaitTimeoutResult {
        let mut serial = self.shared.serial.lock();
        guard.unlocked(move || self.shared.condvar.wait_until(&mut serial, deadline))
    }

    /// Blocks until notified or `timeout` elapses.
    pub fn wait_for<G: Unlock>(&self, guard: &mut G, timeout: Duration) -> WaitTimeoutResult {
        self.wait_until(guard, Instant::now() + timeout)
    }

    /// Blocks until `condition` holds or a stop is requested through `token`.
    ///
    /// Returns the final value of `condition`, evaluated under the caller's
    /// lock at the moment of return.
    pub fn wait_or_stop<G, F>(&self, guard: &mut G, token: &StopToken, mut condition: F) -> bool
    where
        G: Unlock,
        F: FnMut(&mut G) -> bool,
    {
        if token.stop_requested() {
            return condition(guard);
        }
        let _callback = self.stop_callback(token);
        loop {
            if condition(guard) {
                return true;
            }
            let mut serial = self.shared.serial.lock();
            // The callback's notification needs `serial`, which stays held
            // from this check until the wait below has parked.
            if token.stop_requested() {
                drop(serial);
                return condition(guard);
            }
            guard.unlocked(move || {
                self.shared.condvar.wait(&mut serial);
            });
        }
    }

    /// As [`wait_or_stop`](Self::wait_or_stop), additionally giving up once
    /// `deadline` passes.
    pub fn wait_until_or_stop<G, F>(
        &self,
        guard: &mut G,
        token: &StopToken,
        deadline: Instant,
        mut condition: F,
    ) -> bool
    where
        G: Unlock,
        F: FnMut(&mut G) -> bool,
    {
        if token.stop_requested() {
            return condition(guard);
        }
        let _callback = self.stop_callback(token);
        loop {
            if condition(guard) {
                return true;
            }
            if Instant::now() >= deadline {
                return condition(guard);
            }
            let mut serial = self.shared.serial.lock();
            if token.stop_requested() {
                drop(serial);
                return condition(guard);
            }
            guard.unlocked(move || {
                let _ = self.shared.condvar.wait_until(&mut serial, deadline);
            });
        }
    }

    /// As [`wait_or_stop`](Self::wait_or_stop), additionally giving up after
    /// `timeout`.
    pub fn wait_for_or_stop<G, F>(
        &self,
        guard: &mut G,
        token: &StopToken,
        timeout: Duration,
        condition: F,
    ) -> bool
    where
        G: Unlock,
        F: FnMut(&mut G) -> bool,
    {
        self.wait_until_or_stop(guard, token, Instant::now() + timeout, condition)
    }

    fn stop_callback(&self, token: &StopToken) -> StopCallback {
        let shared = Arc::clone(&self.shared);
        StopCallback::new(token, move || shared.notify_all())
    }
}

impl Default for CondvarAny {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CondvarAny {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("CondvarAny { .. }")
    }
}
