//! Interrupt-masking lock.
//!
//! `IrqMutex` wraps a `spin::Mutex` and keeps local interrupts masked for as
//! long as the guard lives. Use it for any state the interrupt-driven wake
//! path shares with task context; a plain spin lock taken there could be
//! re-entered by an interrupt on the same CPU and never released.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::cpu;

pub struct IrqMutex<T> {
    inner: spin::Mutex<T>,
}

pub struct IrqMutexGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    saved_flags: u64,
}

impl<T> IrqMutex<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Mask interrupts, then spin until the lock is ours.
    #[inline]
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let saved_flags = cpu::save_flags_cli();
        IrqMutexGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            saved_flags,
        }
    }

    /// Single attempt; interrupts are left as they were on failure.
    #[inline]
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let saved_flags = cpu::save_flags_cli();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqMutexGuard {
                guard: ManuallyDrop::new(guard),
                saved_flags,
            }),
            None => {
                cpu::restore_flags(saved_flags);
                None
            }
        }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for IrqMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for IrqMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // Unlock before unmasking so an interrupt cannot spin on a lock its
        // own CPU holds.
        // SAFETY: `guard` is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        cpu::restore_flags(self.saved_flags);
    }
}
