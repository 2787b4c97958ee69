//! # Hardware Abstraction Seam
//!
//! The handful of hardware primitives the synchronization core consumes:
//! interrupt-flag save/restore, the CPU pause hint, and the halt loop.
//!
//! Two implementations exist behind the same interface:
//!
//! - On bare metal (`target_os = "none"`) these compile to the real
//!   `pushfq`/`cli`/`sti`/`pause`/`hlt` instructions.
//! - On hosted targets the interrupt flag is emulated per thread, so the
//!   locking crates can be exercised by ordinary `#[test]` runs. `pause`
//!   maps to [`core::hint::spin_loop`], `halt_loop` parks the thread.
//!
//! Everything above this crate is written against the interface only and
//! never issues inline assembly itself.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_code)]

pub mod irq;

pub use irq::{IrqFlags, interrupts_enabled, restore, save_and_disable};

/// CPU pause hint for busy-wait loops.
///
/// Reduces power draw and cache-coherence traffic while spinning. This is
/// a non-blocking primitive by design; it never yields the CPU.
#[inline]
pub fn pause() {
    core::hint::spin_loop();
}

/// Park the calling CPU indefinitely.
///
/// Used by the panic path and the HALT IPI handler. Interrupts are left in
/// whatever state the caller put them; with interrupts disabled this never
/// returns control to anything.
pub fn halt_loop() -> ! {
    #[cfg(target_os = "none")]
    loop {
        // SAFETY: `hlt` is always legal at CPL 0.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }

    #[cfg(not(target_os = "none"))]
    loop {
        std::thread::park();
    }
}
