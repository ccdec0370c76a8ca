use std::fmt;
use std::sync::Arc;

use crate::state::StopState;

/// `StopSource` owns the right to request a stop and hands out [`StopToken`]s
/// observing it.
///
/// Copies made with `clone` share the same stop state and keep it stoppable;
/// once the last source is dropped without a stop request, the associated
/// tokens report `stop_possible() == false` forever.
///
/// # Example:
///
/// ```
/// use stop_thread::StopSource;
///
/// let source = StopSource::new();
/// let token = source.token();
/// assert!(!token.stop_requested());
///
/// assert!(source.request_stop());
/// assert!(token.stop_requested());
/// ```
pub struct StopSource {
    state: Option<Arc<StopState>>,
}

impl StopSource {
    /// Creates a valid source backed by fresh shared state.
    pub fn new() -> Self {
        Self {
            state: Some(Arc::new(StopState::new())),
        }
    }

    /// Creates a source with no shared state and no allocation.
    ///
    /// An empty source cannot request a stop and hands out empty tokens. It
    /// is useful as a placeholder for a detached or not-yet-started handle.
    pub fn empty() -> Self {
        Self { state: None }
    }

    /// True iff this source holds shared state, i.e. it can still win the
    /// stop transition (or already has).
    pub fn stop_possible(&self) -> bool {
        self.state.is_some()
    }

    /// True iff a stop has been requested on this source's state.
    pub fn stop_requested(&self) -> bool {
        self.state.as_deref().map_or(false, StopState::stop_requested)
    }

    /// Requests a stop.
    ///
    /// Returns `true` iff this call performed the false → true transition of
    /// the stop flag; an empty source, and every call after the first
    /// successful one, returns `false`. The winning call runs every
    /// registered callback on the current thread, newest registration first,
    /// before returning. A panic in a callback propagates to this caller and
    /// the remaining callbacks are not invoked, so callbacks should not
    /// panic.
    pub fn request_stop(&self) -> bool {
        self.state.as_deref().map_or(false, StopState::request_stop)
    }

    /// Produces a token observing this source's state.
    ///
    /// Tokens from an empty source are empty.
    pub fn token(&self) -> StopToken {
        StopToken {
            state: self.state.clone(),
        }
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StopSource {
    fn clone(&self) -> Self {
        if let Some(state) = &self.state {
            state.add_source();
        }
        Self {
            state: self.state.clone(),
        }
    }
}

impl Drop for StopSource {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            state.release_source();
        }
    }
}

/// Equality is identity of the shared state; all empty sources are equal.
impl PartialEq for StopSource {
    fn eq(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for StopSource {}

impl fmt::Debug for StopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSource")
            .field("stop_possible", &self.stop_possible())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// `StopToken` observes stop requests issued through the associated
/// [`StopSource`].
///
/// Tokens are cheap to clone and to pass across threads; clones observe the
/// same state. A default-constructed token is *empty*: it reports neither
/// `stop_requested` nor `stop_possible`, and registering a callback on it
/// stores nothing.
///
/// # Example:
///
/// ```
/// use stop_thread::{StopSource, StopToken};
///
/// let source = StopSource::new();
/// let token = source.token();
///
/// // The token keeps working after the source is gone.
/// drop(source);
/// assert!(!token.stop_possible());
/// assert!(!token.stop_requested());
///
/// let empty = StopToken::new();
/// assert!(!empty.stop_possible());
/// ```
#[derive(Clone, Default)]
pub struct StopToken {
    state: Option<Arc<StopState>>,
}

impl StopToken {
    /// Creates an empty token.
    pub fn new() -> Self {
        Self { state: None }
    }

    /// True iff a stop has been requested on the associated state.
    pub fn stop_requested(&self) -> bool {
        self.state.as_deref().map_or(false, StopState::stop_requested)
    }

    /// True iff a stop request has happened or still can: the state exists
    /// and either is stopped already or at least one source is alive.
    pub fn stop_possible(&self) -> bool {
        self.state.as_deref().map_or(false, StopState::stop_possible)
    }

    /// `Err(Stopped)` once a stop has been requested, for `?`-style exits
    /// from worker loops.
    ///
    /// # Example:
    ///
    /// ```
    /// use stop_thread::{StopSource, StopToken, Stopped};
    ///
    /// fn drain(token: &StopToken) -> Result<u32, Stopped> {
    ///     let mut drained = 0;
    ///     for _ in 0..10 {
    ///         token.check()?;
    ///         drained += 1;
    ///     }
    ///     Ok(drained)
    /// }
    ///
    /// let source = StopSource::new();
    /// assert_eq!(drain(&source.token()), Ok(10));
    ///
    /// source.request_stop();
    /// assert_eq!(drain(&source.token()), Err(Stopped));
    /// ```
    pub fn check(&self) -> Result<(), Stopped> {
        if self.stop_requested() {
            Err(Stopped)
        } else {
            Ok(())
        }
    }

    pub(crate) fn state(&self) -> Option<&Arc<StopState>> {
        self.state.as_ref()
    }
}

/// Equality is identity of the shared state; all empty tokens are equal.
impl PartialEq for StopToken {
    fn eq(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for StopToken {}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stop_possible", &self.stop_possible())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// The error returned by [`StopToken::check`] once a stop has been requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stopped;

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stop requested")
    }
}

impl std::error::Error for Stopped {}
