//! Spin-based mutual exclusion for the short, I/O-free critical sections of
//! the buffer cache (one cache entry's flags + data).
//!
//! A distinct lock type for spin-waiting sections (`Spinlock<T>`) is kept
//! separate from sections that may block on real I/O, which use
//! `std::sync::Mutex` directly at the call site (the extend lock and the
//! filesystem-wide namespace mutex). Only the cache's never-blocks-on-disk
//! per-entry lock gets this dedicated spin-based type.

use core::ops::{Deref, DerefMut};

/// A busy-waiting mutual-exclusion lock around a value of type `T`.
///
/// Built on `spin::Mutex`; never blocks the OS thread, so it must only ever
/// be held across work that does not itself block (no disk I/O while held).
pub struct Spinlock<T> {
    name: &'static str,
    inner: spin::Mutex<T>,
}

impl<T> Spinlock<T> {
    /// Creates a new lock named `name` (used only for diagnostics) guarding
    /// `data`.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: spin::Mutex::new(data),
        }
    }

    /// Acquires the lock, spinning until it is available.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        SpinlockGuard {
            name: self.name,
            inner: self.inner.lock(),
        }
    }

    /// Name this lock was created with, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// An RAII guard for a locked [`Spinlock`].
pub struct SpinlockGuard<'s, T> {
    name: &'static str,
    inner: spin::MutexGuard<'s, T>,
}

impl<T> SpinlockGuard<'_, T> {
    /// Name of the lock this guard was produced from, for diagnostics.
    pub fn lock_name(&self) -> &'static str {
        self.name
    }
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
