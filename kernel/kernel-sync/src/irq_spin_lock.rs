use crate::RawIrqSpin;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A spinlock that also masks interrupts on the owning CPU while held.
///
/// Use this for any data an interrupt handler touches: with plain
/// [`SpinLock`](crate::SpinLock), a handler firing on the holder's CPU and
/// taking the same lock spins forever. Interrupts are restored to their
/// pre-acquire state when the guard drops, even if they were already
/// disabled at acquire time.
///
/// Not reentrant — see [`RawIrqSpin`].
pub struct IrqSpinLock<T> {
    raw: RawIrqSpin,
    inner: UnsafeCell<T>,
}

// SAFETY: mutual exclusion plus interrupt masking; only T: Send crosses CPUs.
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}
unsafe impl<T: Send> Send for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            raw: RawIrqSpin::new(),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Disable interrupts and spin until acquired.
    #[inline]
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        self.raw.lock();
        IrqSpinLockGuard { lock: self }
    }

    /// Try once. On failure interrupts are back in their prior state by
    /// the time this returns `None`.
    #[inline]
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        self.raw.try_lock().then(|| IrqSpinLockGuard { lock: self })
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Diagnostic: whether the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Mutable access when holding `&mut self`.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard witnesses exclusive ownership of the lock.
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above.
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: a live guard implies the lock is held by us.
        unsafe { self.lock.raw.unlock() };
    }
}
