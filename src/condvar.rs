use std::fmt;
use std::ops::DerefMut;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, WaitTimeoutResult};

use crate::{StopCallback, StopToken};

/// Wait/notify state shared between a condition variable and any in-flight
/// stop callback it has registered.
///
/// Every notification takes `serial` before forwarding to the inner condition
/// variable, and every waiter holds `serial` from its final "sleep or not"
/// check until the sleep has parked. That serialisation closes the lost-wakeup
/// window that would otherwise exist because the stop flag is not mutated
/// under the caller's lock. Keeping the state behind an `Arc` also means a
/// notification arriving while the condition variable itself is being torn
/// down never touches freed memory.
pub(crate) struct WakeSet {
    pub(crate) serial: Mutex<()>,
    pub(crate) condvar: parking_lot::Condvar,
}

impl WakeSet {
    pub(crate) fn new() -> Self {
        Self {
            serial: Mutex::new(()),
            condvar: parking_lot::Condvar::new(),
        }
    }

    pub(crate) fn notify_one(&self) {
        let _serial = self.serial.lock();
        self.condvar.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        let _serial = self.serial.lock();
        self.condvar.notify_all();
    }
}

/// A condition variable for data behind a [`parking_lot::Mutex`] whose waits
/// can additionally be cut short by a stop request.
///
/// The plain `wait` family behaves like [`parking_lot::Condvar`]. The
/// `*_or_stop` family takes a [`StopToken`] and a condition over the guarded
/// data and waits until the condition holds, a stop is requested, or the
/// deadline passes; the return value is the condition's final value, so
/// `false` means "gave up before the condition held" and
/// `token.stop_requested()` tells why. For locks other than
/// `parking_lot::Mutex`, use [`CondvarAny`](crate::CondvarAny).
///
/// # Example:
///
/// ```
/// use parking_lot::Mutex;
/// use stop_thread::{Condvar, StopSource};
///
/// let source = StopSource::new();
/// let ready = Mutex::new(false);
/// let condvar = Condvar::new();
///
/// // A stop request ends the wait even though the condition never holds.
/// source.request_stop();
/// let satisfied = condvar.wait_or_stop(&mut ready.lock(), &source.token(), |ready| *ready);
/// assert!(!satisfied);
/// ```
pub struct Condvar {
    shared: Arc<WakeSet>,
}

impl Condvar {
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
    /// The caller's mutex is released while waiting and reacquired before
    /// returning. Spurious wakeups are possible; callers re-check their
    /// condition.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        let mut serial = self.shared.serial.lock();
        MutexGuard::unlocked(guard, move || {
            self.shared.condvar.wait(&mut serial);
        });
    }

    /// Blocks until notified or `deadline` passes.
    pub fn wait_until<T: ?Sized>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Instant,
    ) -> WaitTimeoutResult {
        let mut serial = self.shared.serial.lock();
        MutexGuard::unlocked(guard, move || {
            self.shared.condvar.wait_until(&mut serial, deadline)
        })
    }

    /// Blocks until notified or `timeout` elapses.
    pub fn wait_for<T: ?Sized>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
    ) -> WaitTimeoutResult {
        self.wait_until(guard, Instant::now() + timeout)
    }

    /// Blocks until `condition` holds or a stop is requested through `token`.
    ///
    /// Returns the final value of `condition`, evaluated under the caller's
    /// lock at the moment of return.
    pub fn wait_or_stop<T: ?Sized, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        token: &StopToken,
        mut condition: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        if token.stop_requested() {
            return condition(guard.deref_mut());
        }
        let _callback = self.stop_callback(token);
        loop {
            if condition(guard.deref_mut()) {
                return true;
            }
            let mut serial = self.shared.serial.lock();
            // The callback's notification needs `serial`, which stays held
            // from this check until the wait below has parked.
            if token.stop_requested() {
                drop(serial);
                return condition(guard.deref_mut());
            }
            MutexGuard::unlocked(guard, move || {
                self.shared.condvar.wait(&mut serial);
            });
        }
    }

    /// As [`wait_or_stop`](Self::wait_or_stop), additionally giving up once
    /// `deadline` passes.
    pub fn wait_until_or_stop<T: ?Sized, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        token: &StopToken,
        deadline: Instant,
        mut condition: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        if token.stop_requested() {
            return condition(guard.deref_mut());
        }
        let _callback = self.stop_callback(token);
        loop {
            if condition(guard.deref_mut()) {
                return true;
            }
            if Instant::now() >= deadline {
                return condition(guard.deref_mut());
            }
            let mut serial = self.shared.serial.lock();
            if token.stop_requested() {
                drop(serial);
                return condition(guard.deref_mut());
            }
            MutexGuard::unlocked(guard, move || {
                let _ = self.shared.condvar.wait_until(&mut serial, deadline);
            });
        }
    }

    /// As [`wait_or_stop`](Self::wait_or_stop), additionally giving up after
    /// `timeout`.
    pub fn wait_for_or_stop<T: ?Sized, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        token: &StopToken,
        timeout: Duration,
        condition: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_until_or_stop(guard, token, Instant::now() + timeout, condition)
    }

    /// Registers "wake every waiter" on the token for the duration of one
    /// interruptible wait.
    fn stop_callback(&self, token: &StopToken) -> StopCallback {
        let shared = Arc::clone(&self.shared);
        StopCallback::new(token, move || shared.notify_all())
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Condvar { .. }")
    }
}
