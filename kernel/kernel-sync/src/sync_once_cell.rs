use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

/// Cell lifecycle: 0 = empty, 1 = an initializer is running, 2 = ready.
const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

/// An init-once cell safe for concurrent access.
///
/// The process-wide collaborator registrations (scheduler hooks, the IPI
/// backend) use this: constructed once at a defined point during bring-up,
/// read-only forever after, exposed only through accessors.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns the value if it has been initialized.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY is published with Release after the write.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Store `value` if the cell is empty; returns it back otherwise.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        // SAFETY: the BUSY transition grants us exclusive write access.
        unsafe { (*self.value.get()).write(value) };
        self.state.store(READY, Ordering::Release);
        Ok(())
    }

    /// Initialize at most once and return the value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        if self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // SAFETY: we won the race to initialize.
            unsafe { (*self.value.get()).write(init()) };
            self.state.store(READY, Ordering::Release);
        } else {
            // Someone else is initializing; wait for the publish.
            while self.state.load(Ordering::Acquire) != READY {
                kernel_hal::pause();
            }
        }

        // SAFETY: READY either way.
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means the value was written and never taken out.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// SAFETY: shared only after READY; initialization is single-writer.
unsafe impl<T: Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

#[cfg(test)]
mod tests {
    use super::SyncOnceCell;

    #[test]
    fn set_wins_once() {
        let c = SyncOnceCell::new();
        assert!(c.get().is_none());
        assert!(c.set(1).is_ok());
        assert_eq!(c.set(2), Err(2));
        assert_eq!(c.get(), Some(&1));
    }

    #[test]
    fn get_or_init_runs_initializer_once() {
        let c = SyncOnceCell::new();
        assert_eq!(*c.get_or_init(|| 7), 7);
        assert_eq!(*c.get_or_init(|| unreachable!()), 7);
    }
}
