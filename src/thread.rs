//! A joining, cancellable thread handle.
//!
//! [`JoiningThread`] pairs a [`StopSource`] with a spawned OS thread. The
//! worker receives a [`StopToken`] observing that source, and dropping the
//! handle requests a stop before joining; a `JoiningThread` never silently
//! detaches. [`Builder`] mirrors [`std::thread::Builder`] for the cases where
//! the thread needs a name, a stack size, or fallible spawning.

use std::fmt;
use std::io;
use std::panic;
use std::thread::{self, JoinHandle, Thread};

use log::trace;

use crate::{StopSource, StopToken};

/// An owned OS thread that is stopped and joined on drop.
///
/// # Example:
///
/// ```
/// use std::time::Duration;
/// use stop_thread::JoiningThread;
///
/// let worker = JoiningThread::spawn(|token| {
///     while !token.stop_requested() {
///         std::thread::sleep(Duration::from_millis(5));
///     }
/// });
///
/// // Dropping the handle requests a stop, then joins.
/// drop(worker);
/// ```
pub struct JoiningThread<T = ()> {
    source: StopSource,
    handle: Option<JoinHandle<T>>,
}

impl<T> JoiningThread<T>
where
    T: Send + 'static,
{
    /// Spawns a worker, passing it a token observing this handle's source.
    ///
    /// Panics if the OS refuses to spawn a thread; use [`Builder`] to handle
    /// that case.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(StopToken) -> T + Send + 'static,
    {
        Builder::new().spawn(f).expect("failed to spawn thread")
    }

    /// Spawns a worker that does not take a token.
    ///
    /// The token stays implicit: the worker itself cannot observe stop
    /// requests, but the handle's source is live, so `request_stop` still
    /// fires callbacks registered on tokens obtained through the handle.
    pub fn spawn_without_token<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Builder::new()
            .spawn_without_token(f)
            .expect("failed to spawn thread")
    }
}

impl<T> JoiningThread<T> {
    /// Forwards to the owned source.
    pub fn request_stop(&self) -> bool {
        self.source.request_stop()
    }

    /// The source owned by this handle.
    pub fn stop_source(&self) -> &StopSource {
        &self.source
    }

    /// A fresh token observing this handle's source.
    pub fn stop_token(&self) -> StopToken {
        self.source.token()
    }

    /// True until the thread has been joined or detached.
    pub fn joinable(&self) -> bool {
        self.handle.is_some()
    }

    /// The underlying thread, while joinable.
    pub fn thread(&self) -> Option<&Thread> {
        self.handle.as_ref().map(JoinHandle::thread)
    }

    /// Waits for the worker to finish and returns its result.
    ///
    /// Does not request a stop first; call
    /// [`request_stop`](Self::request_stop) (or drop the handle) for that.
    /// A worker panic resumes on this thread.
    pub fn join(mut self) -> T {
        let handle = self
            .handle
            .take()
            .expect("thread already joined or detached");
        match handle.join() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Releases the thread to run to completion on its own.
    ///
    /// The handle's source is dropped with the handle; if it was the last
    /// one, the worker's token stops being stoppable.
    pub fn detach(mut self) {
        self.handle = None;
    }
}

impl<T> Drop for JoiningThread<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            trace!("stopping and joining worker thread");
            self.source.request_stop();
            if let Err(payload) = handle.join() {
                // Forward the worker's panic, unless this thread is already
                // unwinding.
                if !thread::panicking() {
                    panic::resume_unwind(payload);
                }
            }
        }
    }
}

impl<T> fmt::Debug for JoiningThread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoiningThread")
            .field("joinable", &self.joinable())
            .field("stop_requested", &self.source.stop_requested())
            .finish()
    }
}

/// A builder for [`JoiningThread`], mirroring [`std::thread::Builder`].
///
/// # Example:
///
/// ```
/// use stop_thread::thread::Builder;
///
/// let worker = Builder::new()
///     .name("ticker".into())
///     .spawn(|token| while !token.stop_requested() { std::thread::yield_now() })
///     .expect("spawn failed");
/// assert_eq!(worker.thread().and_then(|t| t.name()), Some("ticker"));
/// worker.request_stop();
/// worker.join();
/// ```
#[derive(Debug)]
pub struct Builder {
    inner: thread::Builder,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            inner: thread::Builder::new(),
        }
    }

    /// Names the thread.
    pub fn name(self, name: String) -> Self {
        Self {
            inner: self.inner.name(name),
        }
    }

    /// Sets the size of the thread's stack.
    pub fn stack_size(self, size: usize) -> Self {
        Self {
            inner: self.inner.stack_size(size),
        }
    }

    /// Spawns the worker, passing it a token observing the handle's source.
    ///
    /// The token is cloned out of the source before the thread starts, so a
    /// stop requested right after spawning is never missed.
    pub fn spawn<T, F>(self, f: F) -> io::Result<JoiningThread<T>>
    where
        T: Send + 'static,
        F: FnOnce(StopToken) -> T + Send + 'static,
    {
        let source = StopSource::new();
        let token = source.token();
        let handle = self.inner.spawn(move || f(token))?;
        Ok(JoiningThread {
            source,
            handle: Some(handle),
        })
    }

    /// Spawns a worker that does not take a token.
    pub fn spawn_without_token<T, F>(self, f: F) -> io::Result<JoiningThread<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let source = StopSource::new();
        let handle = self.inner.spawn(f)?;
        Ok(JoiningThread {
            source,
            handle: Some(handle),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
