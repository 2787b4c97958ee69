//! # Concurrency & Multiprocessor Coordination Core
//!
//! The pieces that let one kernel image run correctly on several x86-64
//! processors at once:
//!
//! - [`mutex`]: the blocking FIFO ticket mutex, integrated with the
//!   scheduler's block/wake seam. Waiters sleep; ownership hands off in
//!   strict ticket order.
//! - [`smp`]: bring-up of application processors with a bounded timeout
//!   per CPU. A processor that never reports in is logged and excluded;
//!   boot continues degraded rather than hanging.
//! - [`ipi`]: inter-processor interrupt dispatch over a small fixed
//!   vector set (reschedule, TLB shootdown, halt, panic).
//! - [`lapic`]: the x2APIC backend the IPI layer drives on real hardware.
//! - [`context`]: dispatch-time glue around the low-level context switch
//!   (TSS `rsp0`, current-task bookkeeping, stack plausibility checks).
//! - [`panic`]: the stop-the-world broadcast for the panic path.
//!
//! Scheduling policy, memory management and device drivers live outside
//! this core; they plug in through the scheduler, platform and interrupt
//! controller seams. Nothing here allocates.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_code)]

pub mod context;
pub mod ipi;
pub mod lapic;
pub mod mutex;
pub mod panic;
pub mod smp;

pub use context::switch_to_task;
pub use ipi::{
    IpiController, IpiError, IpiVector, dispatch_ipi, send_ipi, send_ipi_all_except_self,
    set_ipi_controller,
};
pub use lapic::X2Apic;
pub use mutex::{TicketMutex, TicketMutexGuard};
pub use panic::panic_broadcast;
pub use smp::{SmpError, SmpPlatform, SmpSummary, ap_init, smp_init};
