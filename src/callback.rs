use std::fmt;
use std::sync::Arc;

use crate::state::{CallbackNode, StopState};
use crate::StopToken;

/// Scoped registration of a callable on a [`StopToken`].
///
/// While the `StopCallback` is alive, the callable runs exactly once, on the
/// requesting thread, when a stop is requested through the token's source.
/// If the stop had already been requested, the callable instead runs
/// synchronously inside [`new`](Self::new), on the registering thread, before
/// the constructor returns.
///
/// Dropping the `StopCallback` deregisters it: once `drop` returns, the
/// callable has either finished or will never run. A destructor racing an
/// invocation on another thread blocks until that invocation completes; the
/// one exception is dropping the `StopCallback` from inside its own callback,
/// which returns immediately (anything else would self-deadlock).
///
/// # Example:
///
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use stop_thread::{StopCallback, StopSource};
///
/// let source = StopSource::new();
/// let fired = Arc::new(AtomicU32::new(0));
///
/// let counter = Arc::clone(&fired);
/// let _callback = StopCallback::new(&source.token(), move || {
///     counter.fetch_add(1, Ordering::Release);
/// });
///
/// source.request_stop();
/// source.request_stop();
/// assert_eq!(fired.load(Ordering::Acquire), 1);
/// ```
#[must_use = "dropping a StopCallback immediately deregisters the callable"]
pub struct StopCallback {
    state: Option<Arc<StopState>>,
    node: Option<Arc<CallbackNode>>,
}

impl StopCallback {
    /// Registers `callback` on `token`.
    ///
    /// On an empty token, or one whose sources are all gone without a stop
    /// request, nothing is stored and the callback will never run. On a token
    /// that is already stopped the callback runs here, synchronously.
    pub fn new<F>(token: &StopToken, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(state) = token.state() else {
            return Self::inert();
        };
        if !state.stop_possible() {
            return Self::inert();
        }
        match state.register(Box::new(callback)) {
            Some(node) => Self {
                state: Some(Arc::clone(state)),
                node: Some(node),
            },
            // Ran synchronously; nothing left to deregister.
            None => Self::inert(),
        }
    }

    fn inert() -> Self {
        Self {
            state: None,
            node: None,
        }
    }
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        if let (Some(state), Some(node)) = (self.state.take(), self.node.take()) {
            state.deregister(&node);
        }
    }
}

impl fmt::Debug for StopCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCallback")
            .field("registered", &self.node.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::StopSource;

    #[test]
    fn registration_after_stop_runs_synchronously_on_this_thread() {
        let source = StopSource::new();
        source.request_stop();

        let registering_thread = thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        let callback = StopCallback::new(&source.token(), move || {
            *slot.lock() = Some(thread::current().id());
        });

        assert_eq!(*ran_on.lock(), Some(registering_thread));
        drop(callback);
    }

    #[test]
    fn empty_token_registers_nothing() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let callback = StopCallback::new(&StopToken::new(), move || {
            flag.store(true, Ordering::Release);
        });
        drop(callback);
        assert!(!fired.load(Ordering::Acquire));
    }

    #[test]
    fn unstoppable_token_registers_nothing() {
        let token = {
            let source = StopSource::new();
            source.token()
        };
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let callback = StopCallback::new(&token, move || {
            flag.store(true, Ordering::Release);
        });
        drop(callback);
        assert!(!fired.load(Ordering::Acquire));
    }

    #[test]
    fn dropped_callback_never_runs() {
        let source = StopSource::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let callback = StopCallback::new(&source.token(), move || {
            counter.fetch_add(1, Ordering::AcqRel);
        });
        drop(callback);

        source.request_stop();
        assert_eq!(fired.load(Ordering::Acquire), 0);
    }
}
