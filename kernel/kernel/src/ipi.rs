//! # Inter-processor interrupts
//!
//! The small fixed vocabulary the CPUs use to coordinate, carried over
//! fixed, edge-triggered, physical-destination IPIs. Delivery is
//! fire-and-forget: the sender never waits for an acknowledgment, and
//! the effect happens whenever the target takes the interrupt.
//!
//! The actual doorbell write goes through the [`IpiController`] seam; on
//! real hardware that is the x2APIC backend in [`crate::lapic`], and
//! tests substitute a recording mock.

use kernel_cpu::{CpuRegistry, PerCpu};
use kernel_sync::SyncOnceCell;

/// The IPI vectors this kernel uses.
///
/// Placed in the high priority class (0xF0..) so coordination traffic is
/// not starved by device interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpiVector {
    /// Ask the target to run its scheduler at the next opportunity. The
    /// handler itself does nothing; the dispatch decision happens on the
    /// interrupt return path.
    Reschedule = 0xF1,
    /// A page mapping changed; the target must invalidate its TLB before
    /// touching the affected address space again.
    TlbFlush = 0xF2,
    /// Park the target permanently (controlled shutdown).
    Halt = 0xF3,
    /// Another CPU is panicking; stop immediately so state is preserved
    /// for inspection.
    Panic = 0xF4,
}

impl IpiVector {
    /// The raw vector number programmed into the interrupt controller.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a received vector number.
    #[must_use]
    pub const fn from_vector(vector: u8) -> Option<Self> {
        match vector {
            0xF1 => Some(Self::Reschedule),
            0xF2 => Some(Self::TlbFlush),
            0xF3 => Some(Self::Halt),
            0xF4 => Some(Self::Panic),
            _ => None,
        }
    }
}

/// The doorbell-write seam: deliver `vector` to the CPU with the given
/// APIC id.
pub trait IpiController: Sync {
    fn send(&self, apic_id: u32, vector: u8);
}

/// Errors from targeted IPI sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IpiError {
    /// No CPU with this logical id is registered.
    #[error("no CPU with id {0}")]
    UnknownCpu(u32),
    /// The target exists but has not completed bring-up; it could not
    /// take the interrupt.
    #[error("CPU {0} is not online")]
    CpuNotOnline(u32),
}

static CONTROLLER: SyncOnceCell<&'static dyn IpiController> = SyncOnceCell::new();

/// Register the interrupt-controller backend. Effective once; later
/// calls return `false`.
pub fn set_ipi_controller(controller: &'static dyn IpiController) -> bool {
    CONTROLLER.set(controller).is_ok()
}

/// The registered backend.
///
/// # Panics
/// If none has been registered; sending IPIs before the interrupt
/// controller is up is a boot-ordering bug.
#[must_use]
pub fn ipi_controller() -> &'static dyn IpiController {
    *CONTROLLER
        .get()
        .expect("IPI sent before an interrupt controller was registered")
}

/// Send `vector` to exactly one online CPU.
///
/// # Errors
/// [`IpiError::UnknownCpu`] or [`IpiError::CpuNotOnline`]; nothing is
/// sent on error.
pub fn send_ipi(
    registry: &CpuRegistry,
    controller: &dyn IpiController,
    target: u32,
    vector: IpiVector,
) -> Result<(), IpiError> {
    let cpu = registry.get(target).ok_or(IpiError::UnknownCpu(target))?;
    if !cpu.is_online() {
        return Err(IpiError::CpuNotOnline(target));
    }
    controller.send(cpu.apic_id(), vector.as_u8());
    Ok(())
}

/// Broadcast `vector` to every online CPU except the caller's.
///
/// Returns the number of IPIs delivered. A system still running with a
/// single online CPU sends nothing and returns 0.
pub fn send_ipi_all_except_self(
    registry: &CpuRegistry,
    controller: &dyn IpiController,
    vector: IpiVector,
) -> u32 {
    let self_id = PerCpu::current().cpu_id();
    let mut sent = 0;
    for cpu in registry.iter_online() {
        if cpu.cpu_id() == self_id {
            continue;
        }
        controller.send(cpu.apic_id(), vector.as_u8());
        sent += 1;
    }
    sent
}

/// Handle an incoming IPI. Called from the interrupt stubs with the
/// vector that fired; EOI is the stub's business.
pub fn dispatch_ipi(vector: u8) {
    match IpiVector::from_vector(vector) {
        Some(IpiVector::Reschedule) => {
            // Nothing to do in the handler; taking the interrupt was the
            // point, the dispatch decision runs on the return path.
            log::trace!("reschedule IPI on CPU {}", PerCpu::current().cpu_id());
        }
        Some(IpiVector::TlbFlush) => flush_tlb(),
        Some(IpiVector::Halt) => {
            log::info!("halt IPI on CPU {}, parking", PerCpu::current().cpu_id());
            kernel_hal::halt_loop();
        }
        Some(IpiVector::Panic) => {
            log::error!(
                "panic IPI on CPU {}, stopping immediately",
                PerCpu::current().cpu_id()
            );
            kernel_hal::halt_loop();
        }
        None => log::warn!("spurious IPI vector {vector:#x}, ignored"),
    }
}

/// Invalidate the entire TLB by reloading CR3.
fn flush_tlb() {
    #[cfg(target_os = "none")]
    // SAFETY: rewriting CR3 with its current value is always legal at
    // CPL 0 and flushes all non-global entries.
    unsafe {
        let cr3: u64;
        core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
    }

    #[cfg(not(target_os = "none"))]
    log::trace!("TLB flush IPI (no-op on hosted builds)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_cpu::per_cpu::set_current_for_thread;
    use kernel_cpu::CpuInfo;
    use std::sync::Mutex as StdMutex;

    /// Records every (apic_id, vector) pair instead of touching hardware.
    struct RecordingController {
        sent: StdMutex<Vec<(u32, u8)>>,
    }

    impl RecordingController {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(u32, u8)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl IpiController for RecordingController {
        fn send(&self, apic_id: u32, vector: u8) {
            self.sent.lock().unwrap().push((apic_id, vector));
        }
    }

    fn registry_with_cpus(n: u32) -> &'static CpuRegistry {
        let registry: &'static CpuRegistry = Box::leak(Box::new(CpuRegistry::new()));
        let infos: Vec<CpuInfo> = (0..n)
            .map(|i| CpuInfo {
                apic_id: 100 + i,
                enabled: true,
                bsp: i == 0,
            })
            .collect();
        registry.init(&infos).unwrap();
        registry
    }

    #[test]
    fn targeted_send_requires_online_target() {
        let registry = registry_with_cpus(2);
        let ctl = RecordingController::new();

        assert_eq!(
            send_ipi(registry, &ctl, 1, IpiVector::Reschedule),
            Err(IpiError::CpuNotOnline(1))
        );
        assert_eq!(
            send_ipi(registry, &ctl, 7, IpiVector::Reschedule),
            Err(IpiError::UnknownCpu(7))
        );
        assert!(ctl.sent().is_empty());

        registry.mark_online(1).unwrap();
        send_ipi(registry, &ctl, 1, IpiVector::Reschedule).unwrap();
        assert_eq!(ctl.sent(), [(101, 0xF1)]);
    }

    #[test]
    fn broadcast_skips_sender_and_offline_cpus() {
        // Scenario: 4 CPUs online, CPU 0 shoots down a TLB entry.
        let registry = registry_with_cpus(5);
        for id in 0..4 {
            registry.mark_online(id).unwrap();
        }
        // CPU 4 never came online and must not be targeted.

        set_current_for_thread(registry.get(0).unwrap());
        let ctl = RecordingController::new();

        let sent = send_ipi_all_except_self(registry, &ctl, IpiVector::TlbFlush);
        assert_eq!(sent, 3);
        assert_eq!(ctl.sent(), [(101, 0xF2), (102, 0xF2), (103, 0xF2)]);
    }

    #[test]
    fn broadcast_on_sole_cpu_sends_nothing() {
        let registry = registry_with_cpus(3);
        registry.mark_online(0).unwrap();
        set_current_for_thread(registry.get(0).unwrap());

        let ctl = RecordingController::new();
        assert_eq!(send_ipi_all_except_self(registry, &ctl, IpiVector::Halt), 0);
        assert!(ctl.sent().is_empty());
    }

    #[test]
    fn vector_encoding_roundtrip() {
        for v in [
            IpiVector::Reschedule,
            IpiVector::TlbFlush,
            IpiVector::Halt,
            IpiVector::Panic,
        ] {
            assert_eq!(IpiVector::from_vector(v.as_u8()), Some(v));
        }
        assert_eq!(IpiVector::from_vector(0x20), None);
        assert_eq!(IpiVector::from_vector(0xF0), None);
    }

    #[test]
    fn unknown_vector_dispatch_is_harmless() {
        let registry = registry_with_cpus(1);
        set_current_for_thread(registry.get(0).unwrap());
        dispatch_ipi(0x99);
        dispatch_ipi(IpiVector::TlbFlush.as_u8());
    }
}
