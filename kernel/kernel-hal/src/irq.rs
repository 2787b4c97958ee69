//! Interrupt-enable flag save/restore.
//!
//! The interrupt-safe spinlock needs three operations: read the flag,
//! atomically save-and-disable it, and restore a previously saved state.
//! [`IrqFlags`] is the opaque saved state; it is only meaningful between a
//! matched save/restore pair.

/// Saved interrupt-enable state, as returned by [`save_and_disable`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use = "dropping the saved state loses the previous interrupt flag"]
pub struct IrqFlags {
    enabled: bool,
}

impl IrqFlags {
    /// Whether interrupts were enabled at the time of the save.
    #[inline]
    #[must_use]
    pub const fn were_enabled(self) -> bool {
        self.enabled
    }

    /// Reconstruct a saved state from its enabled bit.
    ///
    /// For lock implementations that stash the bit in their own storage
    /// (the interrupt-safe spinlock keeps it inside the lock word's
    /// neighbour) and need to hand it back to [`restore`].
    #[inline]
    pub const fn from_enabled(enabled: bool) -> Self {
        Self { enabled }
    }
}

/// Returns whether interrupts are currently enabled on this CPU.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    imp::interrupts_enabled()
}

/// Disable interrupts, returning the prior state for [`restore`].
#[inline]
pub fn save_and_disable() -> IrqFlags {
    let enabled = imp::interrupts_enabled();
    if enabled {
        imp::disable();
    }
    IrqFlags { enabled }
}

/// Restore a state previously captured by [`save_and_disable`].
///
/// Only re-enables interrupts if they were enabled at save time, so a
/// save/restore pair nested inside an already-disabled section leaves them
/// disabled.
#[inline]
pub fn restore(flags: IrqFlags) {
    if flags.enabled {
        imp::enable();
    }
}

#[cfg(target_os = "none")]
mod imp {
    /// IF is bit 9 of RFLAGS.
    const RFLAGS_IF: u64 = 1 << 9;

    #[inline]
    pub fn interrupts_enabled() -> bool {
        let rflags: u64;
        // SAFETY: reading RFLAGS via pushfq/pop has no side effects.
        unsafe {
            core::arch::asm!(
                "pushfq; pop {}",
                out(reg) rflags,
                options(nomem, preserves_flags)
            );
        }
        rflags & RFLAGS_IF != 0
    }

    #[inline]
    pub fn disable() {
        // SAFETY: `cli` is legal in ring 0, which is the only place this
        // crate runs on bare metal.
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    pub fn enable() {
        // SAFETY: see `disable`.
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) };
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use std::cell::Cell;

    std::thread_local! {
        /// Emulated per-thread interrupt flag; threads start with
        /// interrupts "enabled" like a CPU entering the idle loop.
        static IF: Cell<bool> = const { Cell::new(true) };
    }

    pub fn interrupts_enabled() -> bool {
        IF.with(Cell::get)
    }

    pub fn disable() {
        IF.with(|f| f.set(false));
    }

    pub fn enable() {
        IF.with(|f| f.set(true));
    }
}

#[cfg(test)]
mod tests {
    use super::{interrupts_enabled, restore, save_and_disable};

    #[test]
    fn save_restore_round_trips() {
        assert!(interrupts_enabled());

        let saved = save_and_disable();
        assert!(saved.were_enabled());
        assert!(!interrupts_enabled());

        restore(saved);
        assert!(interrupts_enabled());
    }

    #[test]
    fn nested_save_keeps_interrupts_disabled() {
        let outer = save_and_disable();
        assert!(!interrupts_enabled());

        // The inner pair observes an already-disabled flag and must not
        // re-enable on restore.
        let inner = save_and_disable();
        assert!(!inner.were_enabled());
        restore(inner);
        assert!(!interrupts_enabled());

        restore(outer);
        assert!(interrupts_enabled());
    }
}
