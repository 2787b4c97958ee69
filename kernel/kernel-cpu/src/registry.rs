//! # CPU registry
//!
//! The fixed-capacity table of all [`PerCpu`] descriptors. Storage is
//! static; no allocation happens at any point. The registry is populated
//! exactly once during bring-up from the platform's CPU enumeration and
//! is append-only afterwards: identities never change and the online
//! flags only ever go up.
//!
//! Logical ids are assigned here: the bootstrap processor always becomes
//! CPU 0 and the application processors follow in enumeration order.

use crate::per_cpu::PerCpu;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use kernel_info::smp::MAX_CPUS;

/// One entry of the platform's CPU enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    /// Local APIC id.
    pub apic_id: u32,
    /// Firmware-usable flag; disabled entries are skipped entirely.
    pub enabled: bool,
    /// Whether this entry is the bootstrap processor.
    pub bsp: bool,
}

/// Errors from registry population and status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// `init` ran before. The topology is fixed for the kernel lifetime.
    #[error("CPU registry already initialized")]
    AlreadyInitialized,
    /// More enabled CPUs than the registry can hold.
    #[error("{0} enabled CPUs exceed the capacity of {MAX_CPUS}")]
    TooManyCpus(usize),
    /// The enumeration names no bootstrap processor.
    #[error("no bootstrap processor in CPU enumeration")]
    NoBsp,
    /// The enumeration names more than one bootstrap processor.
    #[error("multiple bootstrap processors in CPU enumeration")]
    MultipleBsps,
    /// A logical CPU id outside the registered range.
    #[error("unknown CPU id {0}")]
    UnknownCpu(u32),
}

/// The table of all logical processors.
pub struct CpuRegistry {
    cpus: [PerCpu; MAX_CPUS],
    /// Number of registered CPUs; written once by `init`.
    total: AtomicU32,
    /// Number of CPUs that have completed bring-up.
    online: AtomicU32,
    initialized: AtomicBool,
}

impl CpuRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cpus: [const { PerCpu::new() }; MAX_CPUS],
            total: AtomicU32::new(0),
            online: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    /// Populate the registry from the platform enumeration.
    ///
    /// Disabled entries are skipped. The BSP becomes logical CPU 0; APs
    /// get ids 1.. in enumeration order. Runs once, on the BSP, before
    /// any other CPU is started; later calls fail.
    ///
    /// # Errors
    /// [`RegistryError::AlreadyInitialized`], [`RegistryError::TooManyCpus`],
    /// [`RegistryError::NoBsp`] or [`RegistryError::MultipleBsps`] on
    /// malformed enumerations; the registry stays unpopulated on error.
    #[allow(clippy::cast_possible_truncation)]
    pub fn init(&self, infos: &[CpuInfo]) -> Result<(), RegistryError> {
        let enabled = || infos.iter().filter(|i| i.enabled);

        let count = enabled().count();
        if count > MAX_CPUS {
            return Err(RegistryError::TooManyCpus(count));
        }
        match enabled().filter(|i| i.bsp).count() {
            0 => return Err(RegistryError::NoBsp),
            1 => {}
            _ => return Err(RegistryError::MultipleBsps),
        }

        // Single-threaded by contract (pre-SMP); the flag only guards
        // against a second init attempt later in the boot.
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(RegistryError::AlreadyInitialized);
        }

        // BSP first, then the APs in the order the platform listed them.
        let bsp = enabled().find(|i| i.bsp).expect("checked above");
        self.cpus[0].assign(0, bsp.apic_id, true);

        for (id, info) in (1u32..).zip(enabled().filter(|i| !i.bsp)) {
            self.cpus[id as usize].assign(id, info.apic_id, false);
        }

        self.total.store(count as u32, Ordering::Release);
        log::debug!(
            "CPU registry initialized: {count} CPUs, BSP apic_id={}",
            bsp.apic_id
        );
        Ok(())
    }

    /// The descriptor for logical CPU `id`, if registered.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&PerCpu> {
        (id < self.cpu_count()).then(|| &self.cpus[id as usize])
    }

    /// Number of registered CPUs.
    #[must_use]
    pub fn cpu_count(&self) -> u32 {
        self.total.load(Ordering::Acquire)
    }

    /// Number of CPUs that have completed bring-up.
    #[must_use]
    pub fn online_count(&self) -> u32 {
        self.online.load(Ordering::Acquire)
    }

    /// Mark logical CPU `id` online.
    ///
    /// Monotonic and idempotent: the online counter increments only on
    /// the first call per CPU. Returns whether this call was the first.
    ///
    /// # Errors
    /// [`RegistryError::UnknownCpu`] for an unregistered id.
    pub fn mark_online(&self, id: u32) -> Result<bool, RegistryError> {
        let cpu = self.get(id).ok_or(RegistryError::UnknownCpu(id))?;
        let newly = cpu.set_online();
        if newly {
            self.online.fetch_add(1, Ordering::AcqRel);
        }
        Ok(newly)
    }

    /// All registered descriptors, in logical-id order.
    pub fn iter(&self) -> impl Iterator<Item = &PerCpu> {
        self.cpus[..self.cpu_count() as usize].iter()
    }

    /// The descriptors of CPUs that have completed bring-up.
    pub fn iter_online(&self) -> impl Iterator<Item = &PerCpu> {
        self.iter().filter(|c| c.is_online())
    }
}

impl Default for CpuRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(n: u32) -> Vec<CpuInfo> {
        (0..n)
            .map(|i| CpuInfo {
                apic_id: i * 2, // x2APIC ids need not be dense
                enabled: true,
                bsp: i == 0,
            })
            .collect()
    }

    #[test]
    fn init_assigns_unique_ids_bsp_first() {
        let reg = CpuRegistry::new();
        reg.init(&topology(4)).unwrap();

        assert_eq!(reg.cpu_count(), 4);
        assert_eq!(reg.online_count(), 0);

        let ids: Vec<u32> = reg.iter().map(PerCpu::cpu_id).collect();
        assert_eq!(ids, [0, 1, 2, 3]);
        assert!(reg.get(0).unwrap().is_bsp());
        assert!(!reg.get(1).unwrap().is_bsp());
        assert_eq!(reg.get(2).unwrap().apic_id(), 4);
        assert!(reg.get(4).is_none());
    }

    #[test]
    fn bsp_becomes_cpu_zero_regardless_of_position() {
        let infos = [
            CpuInfo { apic_id: 10, enabled: true, bsp: false },
            CpuInfo { apic_id: 11, enabled: true, bsp: true },
            CpuInfo { apic_id: 12, enabled: true, bsp: false },
        ];
        let reg = CpuRegistry::new();
        reg.init(&infos).unwrap();

        assert_eq!(reg.get(0).unwrap().apic_id(), 11);
        assert!(reg.get(0).unwrap().is_bsp());
        assert_eq!(reg.get(1).unwrap().apic_id(), 10);
        assert_eq!(reg.get(2).unwrap().apic_id(), 12);
    }

    #[test]
    fn disabled_entries_are_skipped() {
        let infos = [
            CpuInfo { apic_id: 0, enabled: true, bsp: true },
            CpuInfo { apic_id: 1, enabled: false, bsp: false },
            CpuInfo { apic_id: 2, enabled: true, bsp: false },
        ];
        let reg = CpuRegistry::new();
        reg.init(&infos).unwrap();
        assert_eq!(reg.cpu_count(), 2);
        assert_eq!(reg.get(1).unwrap().apic_id(), 2);
    }

    #[test]
    fn init_runs_once() {
        let reg = CpuRegistry::new();
        reg.init(&topology(2)).unwrap();
        assert_eq!(
            reg.init(&topology(2)),
            Err(RegistryError::AlreadyInitialized)
        );
    }

    #[test]
    fn exactly_one_bsp_required() {
        let reg = CpuRegistry::new();
        let mut no_bsp = topology(2);
        no_bsp[0].bsp = false;
        assert_eq!(reg.init(&no_bsp), Err(RegistryError::NoBsp));

        let mut two_bsps = topology(2);
        two_bsps[1].bsp = true;
        assert_eq!(reg.init(&two_bsps), Err(RegistryError::MultipleBsps));

        // Failed validation leaves the registry usable.
        reg.init(&topology(2)).unwrap();
    }

    #[test]
    fn capacity_is_enforced() {
        let reg = CpuRegistry::new();
        let too_many = topology(MAX_CPUS as u32 + 1);
        assert_eq!(
            reg.init(&too_many),
            Err(RegistryError::TooManyCpus(MAX_CPUS + 1))
        );
    }

    #[test]
    fn online_marking_is_idempotent() {
        let reg = CpuRegistry::new();
        reg.init(&topology(3)).unwrap();

        assert!(reg.mark_online(0).unwrap());
        assert!(!reg.mark_online(0).unwrap());
        assert_eq!(reg.online_count(), 1);

        assert!(reg.mark_online(2).unwrap());
        assert_eq!(reg.online_count(), 2);
        assert_eq!(reg.iter_online().count(), 2);

        assert_eq!(reg.mark_online(3), Err(RegistryError::UnknownCpu(3)));
    }
}
