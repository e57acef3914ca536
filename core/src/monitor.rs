//! Mutex + condition variable pair with predicate waits
//!
//! Every blocking handshake in the engine goes through a `Monitor`. Waiters
//! always re-check their predicate after waking, and poisoned locks are
//! recovered rather than propagated so a panicking callback cannot wedge the
//! producer.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Shared state guarded by a mutex, plus one default condition variable
#[derive(Debug, Default)]
pub struct Monitor<T> {
    state: Mutex<T>,
    signal: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            signal: Condvar::new(),
        }
    }

    /// Lock the state, recovering from poisoning
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(|e| {
            tracing::warn!("Monitor mutex poisoned; continuing");
            e.into_inner()
        })
    }

    /// Block on the default condition variable until `ready` holds
    pub fn wait_until<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        ready: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        self.wait_until_on(&self.signal, guard, ready)
    }

    /// Block on `signal` until `ready` holds
    ///
    /// `signal` must only ever be waited on together with this monitor's
    /// mutex.
    pub fn wait_until_on<'a>(
        &self,
        signal: &Condvar,
        guard: MutexGuard<'a, T>,
        mut ready: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        signal
            .wait_while(guard, |state| !ready(state))
            .unwrap_or_else(|e| {
                tracing::warn!("Monitor wait mutex poisoned; continuing");
                e.into_inner()
            })
    }

    /// Wake one waiter on the default condition variable
    pub fn notify_one(&self) {
        self.signal.notify_one();
    }

    /// Wake every waiter on the default condition variable
    pub fn notify_all(&self) {
        self.signal.notify_all();
    }
}

/// Lock a plain mutex, recovering from poisoning
pub fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("{} mutex poisoned; continuing", what);
        e.into_inner()
    })
}
