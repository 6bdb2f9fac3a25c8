//! `IrqMutex<T>` — the lock every shared kernel structure in this crate is
//! guarded by (the active-connections table, the route table).
//!
//! A real kernel's version is a ticket lock that also disables interrupts
//! and preemption while held, so a lock holder can never be descheduled (or
//! interrupted back into itself) mid-critical-section. This crate has no
//! interrupt controller or scheduler in scope, so those concerns don't
//! apply; `IrqMutex` keeps the name and the `lock()`/`try_lock()` shape
//! callers expect but is a thin wrapper over [`spin::Mutex`].

use spin::{Mutex, MutexGuard};

pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

pub struct IrqMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        IrqMutexGuard {
            guard: self.inner.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        self.inner.try_lock().map(|guard| IrqMutexGuard { guard })
    }
}

impl<'a, T> core::ops::Deref for IrqMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> core::ops::DerefMut for IrqMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
