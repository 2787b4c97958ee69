//! # SMP bring-up
//!
//! The bootstrap processor populates the CPU registry from the platform's
//! enumeration, then starts the application processors one at a time and
//! waits for each to report itself online, with a bounded timeout per
//! CPU. Bring-up never hangs: a processor that misses its window is
//! logged and excluded, and the system continues on the CPUs that made
//! it. An AP missing at boot stays excluded; there is no late join.
//!
//! The platform specifics (CPU enumeration, the INIT-SIPI-SIPI dance,
//! the tick source backing the timeout) come in through [`SmpPlatform`],
//! so the bring-up sequencing is testable on a hosted target.

use kernel_cpu::stack_layout;
use kernel_cpu::tss::Ist;
use kernel_cpu::{CpuInfo, CpuRegistry, RegistryError, TssError};
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_info::smp::AP_START_TIMEOUT_TICKS;
use kernel_addr::VirtAddr;
use log::{info, warn};

/// Errors from the bring-up path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SmpError {
    /// The platform enumeration was malformed; bring-up cannot proceed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// IST programming failed during per-CPU initialization.
    #[error(transparent)]
    Tss(#[from] TssError),
    /// The platform could not issue the startup sequence for an AP.
    #[error("platform failed to start AP with APIC id {0}")]
    StartFailed(u32),
}

/// What the bring-up sequencing needs from the boot platform.
pub trait SmpPlatform: Sync {
    /// The firmware's CPU enumeration, BSP included.
    fn cpus(&self) -> &[CpuInfo];

    /// Issue the hardware startup sequence for one AP (INIT-SIPI-SIPI on
    /// real hardware), handing it the stack it should enter the kernel
    /// on. Returning `Ok` means the sequence was sent, not that the CPU
    /// is up; the caller polls for that separately.
    ///
    /// # Errors
    /// [`SmpError::StartFailed`] when the sequence cannot be issued.
    fn start_ap(&self, apic_id: u32, entry_stack: VirtAddr) -> Result<(), SmpError>;

    /// Monotonic coarse clock used for the bring-up timeout. Expected to
    /// tick at roughly 100 Hz.
    fn ticks(&self) -> u64;
}

/// Outcome of [`smp_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpSummary {
    /// CPUs registered from the enumeration.
    pub total: u32,
    /// CPUs online when bring-up finished (including the BSP).
    pub online: u32,
    /// CPUs that were started but never reported in.
    pub failed: u32,
}

/// Bring up all application processors. Runs once, on the BSP.
///
/// Populates the registry, marks the BSP online, then starts each AP and
/// polls its online flag for at most [`AP_START_TIMEOUT_TICKS`]. Failures
/// degrade the system instead of stopping it.
///
/// # Errors
/// Only a malformed enumeration is fatal ([`SmpError::Registry`]);
/// individual AP failures are reported through the summary.
pub fn smp_init(
    registry: &CpuRegistry,
    platform: &dyn SmpPlatform,
) -> Result<SmpSummary, SmpError> {
    registry.init(platform.cpus())?;
    let total = registry.cpu_count();

    registry.mark_online(0)?;
    info!("SMP: BSP online, starting {} APs", total - 1);

    let mut failed = 0;
    for cpu_id in 1..total {
        let cpu = registry.get(cpu_id).ok_or(RegistryError::UnknownCpu(cpu_id))?;
        cpu.set_kstack(
            stack_layout::kstack_base_for_cpu(cpu_id),
            KERNEL_STACK_SIZE,
        );

        let apic_id = cpu.apic_id();
        if let Err(err) = platform.start_ap(apic_id, stack_layout::kstack_top_for_cpu(cpu_id)) {
            warn!("SMP: CPU {cpu_id} (APIC {apic_id}) start failed: {err}; continuing without it");
            failed += 1;
            continue;
        }

        if wait_for_online(cpu, platform) {
            info!("SMP: CPU {cpu_id} (APIC {apic_id}) online");
        } else {
            warn!(
                "SMP: CPU {cpu_id} (APIC {apic_id}) did not report within {AP_START_TIMEOUT_TICKS} ticks; continuing without it"
            );
            failed += 1;
        }
    }

    let summary = SmpSummary {
        total,
        online: registry.online_count(),
        failed,
    };
    info!(
        "SMP: bring-up complete, {}/{} CPUs online ({} failed)",
        summary.online, summary.total, summary.failed
    );
    Ok(summary)
}

/// Poll one AP's online flag against the platform clock.
fn wait_for_online(cpu: &kernel_cpu::PerCpu, platform: &dyn SmpPlatform) -> bool {
    let start = platform.ticks();
    loop {
        if cpu.is_online() {
            return true;
        }
        if platform.ticks().wrapping_sub(start) > AP_START_TIMEOUT_TICKS {
            return false;
        }
        kernel_hal::pause();
    }
}

/// Per-processor initialization, run by each AP as its first kernel code
/// (the BSP runs it too, without the startup handshake).
///
/// Builds and installs the CPU's private GDT/TSS, programs the IST stacks
/// for the fatal-fault handlers, publishes the descriptor through the GS
/// base, and reports the CPU online. The caller falls into its idle path
/// afterwards.
///
/// # Errors
/// [`SmpError::Registry`] for an unknown id, [`SmpError::Tss`] if IST
/// programming fails.
pub fn ap_init(registry: &'static CpuRegistry, cpu_id: u32) -> Result<(), SmpError> {
    let cpu = registry
        .get(cpu_id)
        .ok_or(RegistryError::UnknownCpu(cpu_id))?;

    let kstack_top = stack_layout::kstack_top_for_cpu(cpu_id);
    cpu.set_kstack(stack_layout::kstack_base_for_cpu(cpu_id), KERNEL_STACK_SIZE);
    cpu.build_tables(kstack_top);

    for ist in [Ist::DoubleFault, Ist::Nmi, Ist::MachineCheck, Ist::Debug] {
        cpu.set_ist_slot(ist.slot(), stack_layout::ist_top_for_cpu(cpu_id, ist))?;
    }

    #[cfg(target_os = "none")]
    // SAFETY: this runs on the CPU the descriptor belongs to, before
    // interrupts are enabled there, and the registry is static.
    unsafe {
        cpu.install_tables();
        cpu.install_gs_base();
        crate::lapic::enable_current_cpu();
    }

    registry.mark_online(cpu_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Platform mock: "starts" an AP by marking it online immediately,
    /// except for APIC ids on the deaf list, which never answer. The
    /// clock advances on every read so timeouts elapse without real time
    /// passing.
    struct MockPlatform {
        infos: Vec<CpuInfo>,
        registry: &'static CpuRegistry,
        deaf: Vec<u32>,
        clock: AtomicU64,
        started: StdMutex<Vec<u32>>,
    }

    impl MockPlatform {
        fn new(registry: &'static CpuRegistry, cpus: u32, deaf: Vec<u32>) -> Self {
            Self {
                infos: (0..cpus)
                    .map(|i| CpuInfo {
                        apic_id: i,
                        enabled: true,
                        bsp: i == 0,
                    })
                    .collect(),
                registry,
                deaf,
                clock: AtomicU64::new(0),
                started: StdMutex::new(Vec::new()),
            }
        }
    }

    impl SmpPlatform for MockPlatform {
        fn cpus(&self) -> &[CpuInfo] {
            &self.infos
        }

        fn start_ap(&self, apic_id: u32, entry_stack: VirtAddr) -> Result<(), SmpError> {
            assert!(entry_stack.is_aligned(16));
            self.started.lock().unwrap().push(apic_id);
            if !self.deaf.contains(&apic_id) {
                // Logical id == apic id with this enumeration.
                self.registry.mark_online(apic_id).unwrap();
            }
            Ok(())
        }

        fn ticks(&self) -> u64 {
            self.clock.fetch_add(1, Ordering::Relaxed)
        }
    }

    fn leaked_registry() -> &'static CpuRegistry {
        Box::leak(Box::new(CpuRegistry::new()))
    }

    #[test]
    fn all_aps_come_online() {
        let registry = leaked_registry();
        let platform = MockPlatform::new(registry, 4, vec![]);

        let summary = smp_init(registry, &platform).unwrap();
        assert_eq!(
            summary,
            SmpSummary {
                total: 4,
                online: 4,
                failed: 0
            }
        );
        assert_eq!(*platform.started.lock().unwrap(), [1, 2, 3]);
        // Stacks were assigned before the APs started.
        assert_eq!(registry.get(2).unwrap().kstack_len(), KERNEL_STACK_SIZE);
    }

    #[test]
    fn deaf_ap_is_excluded_without_hanging() {
        // Scenario: CPU 2 acknowledges the startup sequence but never
        // reports online.
        let registry = leaked_registry();
        let platform = MockPlatform::new(registry, 4, vec![2]);

        let summary = smp_init(registry, &platform).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.online, 3);
        assert_eq!(summary.failed, 1);

        assert!(!registry.get(2).unwrap().is_online());
        assert!(registry.get(3).unwrap().is_online());
        // The poll loop consumed the clock, so the timeout really ran.
        assert!(platform.clock.load(Ordering::Relaxed) > AP_START_TIMEOUT_TICKS);
    }

    #[test]
    fn malformed_enumeration_is_fatal() {
        let registry = leaked_registry();
        let mut platform = MockPlatform::new(registry, 2, vec![]);
        platform.infos[0].bsp = false;

        assert_eq!(
            smp_init(registry, &platform),
            Err(SmpError::Registry(RegistryError::NoBsp))
        );
    }

    #[test]
    fn ap_init_builds_tables_and_reports_online() {
        let registry = leaked_registry();
        let infos: Vec<CpuInfo> = (0..2)
            .map(|i| CpuInfo {
                apic_id: i,
                enabled: true,
                bsp: i == 0,
            })
            .collect();
        registry.init(&infos).unwrap();

        ap_init(registry, 1).unwrap();

        let cpu = registry.get(1).unwrap();
        assert!(cpu.is_online());
        assert_eq!(cpu.rsp0(), stack_layout::kstack_top_for_cpu(1));
        assert_eq!(
            cpu.ist_slot(Ist::DoubleFault.slot()).unwrap(),
            stack_layout::ist_top_for_cpu(1, Ist::DoubleFault)
        );
        // Slots 5..7 stay unprogrammed.
        assert!(cpu.ist_slot(5).unwrap().is_null());

        assert_eq!(
            ap_init(registry, 9),
            Err(SmpError::Registry(RegistryError::UnknownCpu(9)))
        );
    }
}
