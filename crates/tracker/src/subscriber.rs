//! Callback gate between a watcher and its caller.
//!
//! Every update a watcher produces goes through [`Subscriber::emit`].
//! [`Subscriber::cancel`] flips a liveness flag and, unless it is called
//! from inside the callback itself, waits for a callback running on
//! another thread to return. Once `cancel` returns the callback never runs
//! again, no matter what is still in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

type Callback<T> = Box<dyn FnMut(T) + Send>;

pub(crate) struct Subscriber<T> {
    live: AtomicBool,
    callback: Mutex<Callback<T>>,
    /// Thread currently inside the callback, for re-entrant `cancel`.
    emitting_on: Mutex<Option<ThreadId>>,
}

impl<T> Subscriber<T> {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self {
            live: AtomicBool::new(true),
            callback: Mutex::new(Box::new(callback)),
            emitting_on: Mutex::new(None),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Deliver `value` unless the subscriber was cancelled.
    ///
    /// Returns whether the callback ran.
    pub(crate) fn emit(&self, value: T) -> bool {
        if !self.is_live() {
            return false;
        }

        let mut callback = lock(&self.callback);
        // Re-check under the lock: `cancel` may have won the race.
        if !self.is_live() {
            return false;
        }

        *lock(&self.emitting_on) = Some(thread::current().id());
        (callback)(value);
        *lock(&self.emitting_on) = None;
        true
    }

    /// Stop all further deliveries. Idempotent.
    pub(crate) fn cancel(&self) {
        self.live.store(false, Ordering::SeqCst);

        let reentrant = *lock(&self.emitting_on) == Some(thread::current().id());
        if !reentrant {
            // Wait out a callback that is running on another thread.
            drop(lock(&self.callback));
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
