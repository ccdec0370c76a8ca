//! Cooperative cancellation for OS threads.
//!
//! # Motivation
//!
//! OS threads cannot be killed, and most of the time that is the right
//! default: a thread holding a lock or halfway through a write must not
//! vanish. What a long-running worker needs instead is *cooperative*
//! cancellation: a cheap flag it can poll between units of work, a way to be
//! woken out of a blocking wait when that flag flips, and a guarantee that
//! whoever owns the thread stops it and joins it before letting go.
//!
//! This crate provides those three pieces:
//!
//! - [`StopSource`], [`StopToken`] and [`StopCallback`]: the stop-request
//!   substrate. A source flips the shared flag exactly once; tokens observe
//!   it; callbacks are scoped side-effects that fire on the requesting thread
//!   when the flag flips.
//! - [`Condvar`] and [`CondvarAny`]: condition variables whose waits can
//!   also end on a stop request, for `parking_lot::Mutex` specifically and
//!   for any [`Unlock`]-able guard respectively.
//! - [`JoiningThread`]: a thread handle owning a stop source; dropping it
//!   requests a stop, then joins. It never silently detaches.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use parking_lot::Mutex;
//! use stop_thread::{Condvar, JoiningThread};
//!
//! let inbox = std::sync::Arc::new((Mutex::new(Vec::new()), Condvar::new()));
//!
//! let worker = {
//!     let inbox = std::sync::Arc::clone(&inbox);
//!     JoiningThread::spawn(move |token| {
//!         let (queue, condvar) = &*inbox;
//!         let mut handled = 0u32;
//!         let mut queue = queue.lock();
//!         // Wake on new work or on a stop request, whichever comes first.
//!         while condvar.wait_or_stop(&mut queue, &token, |q: &mut Vec<u32>| !q.is_empty()) {
//!             handled += queue.drain(..).count() as u32;
//!         }
//!         handled
//!     })
//! };
//!
//! inbox.0.lock().push(7);
//! inbox.1.notify_one();
//! std::thread::sleep(Duration::from_millis(50));
//!
//! worker.request_stop();
//! assert_eq!(worker.join(), 1);
//! ```
//!
//! # Lineage
//!
//! The cancellation system is a subset of `C#` [`CancellationToken /
//! CancellationTokenSource`](https://docs.microsoft.com/en-us/dotnet/standard/threading/cancellation-in-managed-threads).
//! The `StopToken / StopSource` terminology and the joining-thread semantics
//! are borrowed from C++ paper P0660 (<https://wg21.link/p0660>), which became
//! `std::stop_token` / `std::jthread` in C++20; the interruptible condition
//! variables follow the stop-token overloads of
//! `std::condition_variable_any`.

#![forbid(unsafe_code)]

mod callback;
mod condvar;
mod condvar_any;
mod state;
mod stop_source;
pub mod thread;

pub use callback::StopCallback;
pub use condvar::Condvar;
pub use condvar_any::{CondvarAny, Unlock};
pub use stop_source::{StopSource, StopToken, Stopped};
pub use thread::JoiningThread;
