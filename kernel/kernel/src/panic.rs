//! # Panic coordination
//!
//! When one CPU panics the others must stop touching shared state so
//! the machine freezes in an inspectable condition. The panicking CPU
//! broadcasts [`IpiVector::Panic`] and then parks itself; the receivers
//! halt in their IPI handler.

use kernel_cpu::CpuRegistry;
use log::error;

use crate::ipi::{IpiController, IpiVector, send_ipi_all_except_self};

/// Freeze every other online CPU, then halt this one. The final stop on
/// the panic path, after the panic message has been logged.
pub fn panic_broadcast(registry: &CpuRegistry, controller: &dyn IpiController) -> ! {
    let notified = send_ipi_all_except_self(registry, controller, IpiVector::Panic);
    error!("panic: halted {notified} other CPUs, parking");
    kernel_hal::halt_loop()
}
