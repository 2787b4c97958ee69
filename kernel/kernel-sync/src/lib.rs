//! # Kernel synchronization primitives
//!
//! Busy-wait mutual exclusion for short, bounded critical sections.
//!
//! Two raw locks are provided: [`RawSpin`], the plain test-and-test-and-set
//! spinlock, and [`RawIrqSpin`], the interrupt-safe variant for data shared
//! with interrupt handlers on the same core. [`SpinLock`] and
//! [`IrqSpinLock`] wrap them with RAII guards around the protected data.
//!
//! Spinlocks never suspend the caller; a contended acquire burns the CPU
//! (with a pause hint) until the holder releases. They must therefore be
//! held only across small critical sections and never across anything that
//! can block. There is no fairness guarantee: a spinning waiter can be
//! starved indefinitely by fresh contenders. Callers that may wait a
//! non-trivial time belong on the blocking ticket mutex instead.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod irq_spin_lock;
mod raw_irq_spin;
mod raw_spin;
mod spin_lock;
mod sync_once_cell;

pub use irq_spin_lock::{IrqSpinLock, IrqSpinLockGuard};
pub use raw_irq_spin::RawIrqSpin;
pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
