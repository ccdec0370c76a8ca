//! The reference-counted state shared by a stop source, its tokens, and
//! their registered callbacks.
//!
//! `StopState` is the only shared mutable object in the crate. The `stopped`
//! flag and the source count are atomics; the callback list and the identity
//! of the requesting thread live behind a single mutex, which also serialises
//! a stop request's callback fan-out against concurrent registration and
//! deregistration.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::trace;
use parking_lot::{Condvar, Mutex};

type BoxedCallback = Box<dyn FnOnce() + Send>;

/// A registered stop callback.
///
/// Nodes are owned jointly by the `StopCallback` handle and, once a stop
/// request has unlinked them, by the fan-out loop, so a node outlives a
/// reentrant destruction of its handle.
pub(crate) struct CallbackNode {
    /// Taken exactly once, by whichever thread ends up invoking the callback.
    callback: Mutex<Option<BoxedCallback>>,
    /// Set once the callback has returned; deregistration from another thread
    /// blocks on it.
    done: Mutex<bool>,
    done_signal: Condvar,
}

impl CallbackNode {
    fn new(callback: BoxedCallback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
            done: Mutex::new(false),
            done_signal: Condvar::new(),
        }
    }

    /// Runs the callback, then publishes completion.
    ///
    /// The callback itself runs with no lock held. A panic inside it
    /// propagates and leaves `done` unset.
    fn invoke(&self) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        *self.done.lock() = true;
        self.done_signal.notify_all();
    }

    fn wait_done(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.done_signal.wait(&mut done);
        }
    }
}

struct Registry {
    /// Registration pushes, fan-out pops from the back: callbacks run in
    /// reverse registration order.
    callbacks: Vec<Arc<CallbackNode>>,
    /// Identity of the thread that won the stop transition. `None` until
    /// then, never reset afterwards.
    requester: Option<ThreadId>,
}

pub(crate) struct StopState {
    stopped: AtomicBool,
    sources: AtomicUsize,
    registry: Mutex<Registry>,
}

impl StopState {
    pub(crate) fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            sources: AtomicUsize::new(1),
            registry: Mutex::new(Registry {
                callbacks: Vec::new(),
                requester: None,
            }),
        }
    }

    /// Acquire load: writes made before the winning `request_stop` are
    /// visible to any thread that observes `true` here.
    pub(crate) fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True while a stop request can still happen, or already has.
    pub(crate) fn stop_possible(&self) -> bool {
        self.stop_requested() || self.sources.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn add_source(&self) {
        self.sources.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_source(&self) {
        self.sources.fetch_sub(1, Ordering::Release);
    }

    /// Flips `stopped` and, on the winning call, drains the callback list.
    ///
    /// Returns `true` iff this call performed the false → true transition.
    /// Callbacks run one at a time on the calling thread, newest registration
    /// first. The registry lock is dropped around every invocation: callbacks
    /// reach back into caller code (condition-variable notifications and the
    /// like) that takes other locks.
    pub(crate) fn request_stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut registry = self.registry.lock();
        // Recorded before any node is unlinked, so a deregistration that
        // finds its node gone can tell "we are the requesting thread" apart
        // from "the requester is elsewhere".
        registry.requester = Some(thread::current().id());
        trace!(
            "stop requested on {:?}, {} callback(s) registered",
            thread::current().id(),
            registry.callbacks.len()
        );
        while let Some(node) = registry.callbacks.pop() {
            drop(registry);
            node.invoke();
            registry = self.registry.lock();
        }
        drop(registry);
        true
    }

    /// Links `callback` into the registry, or runs it on the spot when stop
    /// has already been requested.
    ///
    /// Returns the linked node, or `None` for the ran-synchronously case.
    /// The stopped check happens under the registry lock, so a registration
    /// racing the winning `request_stop` either lands in the list before the
    /// fan-out drains it or takes the synchronous path; it is never dropped.
    pub(crate) fn register(&self, callback: BoxedCallback) -> Option<Arc<CallbackNode>> {
        let mut registry = self.registry.lock();
        if self.stop_requested() {
            drop(registry);
            callback();
            return None;
        }
        let node = Arc::new(CallbackNode::new(callback));
        registry.callbacks.push(Arc::clone(&node));
        Some(node)
    }

    /// Unlinks `node`, blocking until an invocation in flight on another
    /// thread has finished.
    ///
    /// When called from the requesting thread itself and the node is already
    /// gone from the list, returns immediately: either we are inside this
    /// very callback (waiting would self-deadlock) or the fan-out on this
    /// thread finished it earlier.
    pub(crate) fn deregister(&self, node: &Arc<CallbackNode>) {
        let mut registry = self.registry.lock();
        if let Some(index) = registry
            .callbacks
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, node))
        {
            registry.callbacks.remove(index);
            return;
        }
        // The fan-out has unlinked the node: the callback is running now or
        // has already run.
        let requester = registry.requester;
        drop(registry);
        if requester == Some(thread::current().id()) {
            return;
        }
        node.wait_done();
    }
}
