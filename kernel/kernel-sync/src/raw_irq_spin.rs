use crate::RawSpin;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_hal::irq;

/// Interrupt-safe raw spinlock.
///
/// `lock` first disables interrupts on the calling CPU, recording the
/// prior interrupt-enable state, then acquires the lock word; `unlock`
/// releases the lock word and then restores the recorded state. This is
/// the lock for data shared between ordinary task context and interrupt
/// handlers running on the same core: a handler can never preempt the
/// critical section and deadlock on the lock it interrupts.
///
/// The saved flag lives in the lock itself and is valid only between a
/// matched acquire/release pair. The lock is therefore **not reentrant**:
/// a second acquire on the same instance before release overwrites the
/// saved flag and the eventual restores are wrong.
pub struct RawIrqSpin {
    inner: RawSpin,
    /// Interrupt-enable state captured at acquire time. Written only while
    /// the lock is held, so plain relaxed accesses suffice.
    saved_if: AtomicBool,
}

impl Default for RawIrqSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawIrqSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RawSpin::new(),
            saved_if: AtomicBool::new(false),
        }
    }

    /// Disable interrupts, record the prior state, then spin-acquire.
    #[inline]
    pub fn lock(&self) {
        let flags = irq::save_and_disable();
        self.inner.lock();
        self.saved_if.store(flags.were_enabled(), Ordering::Relaxed);
    }

    /// Non-blocking acquire. On failure the interrupt state is restored
    /// before returning.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let flags = irq::save_and_disable();
        if self.inner.try_lock() {
            self.saved_if.store(flags.were_enabled(), Ordering::Relaxed);
            true
        } else {
            irq::restore(flags);
            false
        }
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Release the lock, then restore the interrupt state recorded at
    /// acquire time.
    ///
    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        let saved = irq::IrqFlags::from_enabled(self.saved_if.load(Ordering::Relaxed));
        // SAFETY: forwarded from the caller.
        unsafe { self.inner.unlock() };
        irq::restore(saved);
    }
}

#[cfg(test)]
mod tests {
    use super::RawIrqSpin;
    use kernel_hal::irq;

    #[test]
    fn interrupt_state_symmetric_when_enabled() {
        let l = RawIrqSpin::new();
        assert!(irq::interrupts_enabled());

        l.lock();
        assert!(!irq::interrupts_enabled(), "held section must mask interrupts");
        unsafe { l.unlock() };

        assert!(irq::interrupts_enabled());
    }

    #[test]
    fn interrupt_state_symmetric_when_already_disabled() {
        let outer = irq::save_and_disable();

        let l = RawIrqSpin::new();
        l.lock();
        unsafe { l.unlock() };
        // Acquire happened with IF already clear; release must not turn
        // interrupts back on.
        assert!(!irq::interrupts_enabled());

        irq::restore(outer);
        assert!(irq::interrupts_enabled());
    }

    #[test]
    fn failed_try_lock_restores_interrupts() {
        let l = RawIrqSpin::new();
        l.lock();

        // Second contender fails and must leave IF as it found it — which
        // is "disabled", because the holder masked it on this thread.
        assert!(!l.try_lock());
        assert!(!irq::interrupts_enabled());

        unsafe { l.unlock() };
        assert!(irq::interrupts_enabled());
    }
}
