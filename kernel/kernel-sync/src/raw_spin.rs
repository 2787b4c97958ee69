use core::sync::atomic::{AtomicBool, Ordering};

/// The raw spinlock: a single lock word, `false` = free, `true` = held.
///
/// Acquire is test-and-set with a read-only inner spin (TATAS): the fast
/// path attempts one atomic swap; on contention the waiter re-reads the
/// lock word before every further swap attempt so it doesn't hammer the
/// cache line with writes, and issues a pause hint each iteration.
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired.
    #[inline]
    pub fn lock(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Acquire) {
                kernel_hal::pause();
            }
        }
    }

    /// Try once; returns `true` if the lock was taken.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    /// Whether the lock is currently held by someone.
    ///
    /// Diagnostic only; the answer can be stale by the time it is used.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Release the lock.
    ///
    /// # Safety
    /// The caller must hold the lock. The Release store publishes every
    /// write made inside the critical section.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::RawSpin;

    #[test]
    fn lock_state_tracks_acquire_release() {
        let l = RawSpin::new();
        assert!(!l.is_locked());

        l.lock();
        assert!(l.is_locked());
        assert!(!l.try_lock());

        unsafe { l.unlock() };
        assert!(!l.is_locked());
        assert!(l.try_lock());
        unsafe { l.unlock() };
    }
}
