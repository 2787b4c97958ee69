//! # Per-CPU descriptor
//!
//! One [`PerCpu`] exists per logical processor, owned by the registry for
//! the lifetime of the kernel. Identity and status fields are atomics so
//! the bring-up handshake (BSP polling an AP's online flag) needs no
//! locks; the hardware tables sit behind a spinlock and are only ever
//! mutated by the owning CPU outside that handshake.
//!
//! Each CPU publishes its descriptor address through the GS base during
//! bring-up, which makes [`PerCpu::current`] a lock-free MSR read. Hosted
//! builds substitute a settable thread-local so tests can fake the
//! calling CPU.

use crate::gdt::{self, Gdt, Selectors};
use crate::tss::{Tss64, TssError};
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use kernel_addr::VirtAddr;
use kernel_sync::SpinLock;
use kernel_task::{Task, TaskRef};

/// The hardware tables of one CPU: private GDT, private TSS and the
/// selector set. Kept together because the GDT's TSS descriptor encodes
/// the address of the TSS next to it.
pub struct CpuTables {
    pub tss: Tss64,
    pub gdt: Gdt,
    pub selectors: Selectors,
}

impl CpuTables {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tss: Tss64::new(),
            gdt: Gdt::new(),
            selectors: Selectors::new(),
        }
    }
}

impl Default for CpuTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the kernel tracks about one logical processor.
#[repr(C, align(64))] // cache-line aligned to avoid false sharing
pub struct PerCpu {
    /// Logical CPU index (0 = BSP).
    cpu_id: AtomicU32,
    /// Local APIC id, the hardware addressing identity for IPIs.
    apic_id: AtomicU32,
    /// Whether this is the bootstrap processor.
    bsp: AtomicBool,
    /// Monotonic: set once when the CPU finishes bring-up, never cleared.
    online: AtomicBool,
    /// Lowest address of this CPU's kernel stack.
    kstack_base: AtomicU64,
    /// Mapped length of the kernel stack in bytes.
    kstack_len: AtomicU64,
    /// The task currently running here; null while idle.
    current_task: AtomicPtr<Task>,
    /// Private GDT + TSS + selectors.
    tables: SpinLock<CpuTables>,
}

impl PerCpu {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cpu_id: AtomicU32::new(0),
            apic_id: AtomicU32::new(0),
            bsp: AtomicBool::new(false),
            online: AtomicBool::new(false),
            kstack_base: AtomicU64::new(0),
            kstack_len: AtomicU64::new(0),
            current_task: AtomicPtr::new(core::ptr::null_mut()),
            tables: SpinLock::new(CpuTables::new()),
        }
    }

    /// Stamp identity. Called once by the registry during bring-up.
    pub(crate) fn assign(&self, cpu_id: u32, apic_id: u32, bsp: bool) {
        self.cpu_id.store(cpu_id, Ordering::Relaxed);
        self.apic_id.store(apic_id, Ordering::Relaxed);
        self.bsp.store(bsp, Ordering::Relaxed);
    }

    #[must_use]
    pub fn cpu_id(&self) -> u32 {
        self.cpu_id.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn apic_id(&self) -> u32 {
        self.apic_id.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_bsp(&self) -> bool {
        self.bsp.load(Ordering::Relaxed)
    }

    /// Whether this CPU has completed bring-up.
    ///
    /// Acquire pairs with the release in [`Self::set_online`], so an
    /// observer that sees `true` also sees the tables the CPU installed
    /// before announcing itself.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Mark this CPU online. Returns `true` only for the first call.
    pub(crate) fn set_online(&self) -> bool {
        !self.online.swap(true, Ordering::Release)
    }

    /// Record the kernel-stack bounds for this CPU.
    pub fn set_kstack(&self, base: VirtAddr, len: u64) {
        self.kstack_base.store(base.as_u64(), Ordering::Relaxed);
        self.kstack_len.store(len, Ordering::Relaxed);
    }

    #[must_use]
    pub fn kstack_base(&self) -> VirtAddr {
        VirtAddr::new(self.kstack_base.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn kstack_len(&self) -> u64 {
        self.kstack_len.load(Ordering::Relaxed)
    }

    /// Highest usable stack address, 16-byte aligned.
    #[must_use]
    pub fn kstack_top(&self) -> VirtAddr {
        (self.kstack_base() + self.kstack_len()).align_down(16)
    }

    /// The task currently running on this CPU, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskRef> {
        let ptr = self.current_task.load(Ordering::Acquire);
        core::ptr::NonNull::new(ptr).map(|p| {
            // SAFETY: only live tasks are ever stored here.
            unsafe { TaskRef::new_unchecked(p.as_ref()) }
        })
    }

    /// Install the task back-pointer; `None` marks the CPU idle.
    pub fn set_current_task(&self, task: Option<TaskRef>) {
        let ptr = task.map_or(core::ptr::null_mut(), TaskRef::as_ptr);
        self.current_task.store(ptr, Ordering::Release);
    }

    /// Construct this CPU's GDT and TSS around the given kernel stack.
    ///
    /// Programs `rsp0` and points the GDT's TSS descriptor at the private
    /// TSS. Does not touch hardware; pair with [`Self::install_tables`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn build_tables(&self, kstack_top: VirtAddr) {
        let mut tables = self.tables.lock();
        tables.tss.set_rsp0(kstack_top);

        // The descriptor encodes the TSS address; the TSS lives inside
        // this (static) PerCpu, so the address is stable after boot.
        let tss_base = VirtAddr::from_ptr(core::ptr::from_ref(&tables.tss));
        let tss_limit = (size_of::<Tss64>() - 1) as u32;
        tables
            .gdt
            .set_tss(gdt::tss_desc::TssDesc64::new(tss_base, tss_limit));
    }

    /// Load this CPU's GDT and TSS into the hardware.
    ///
    /// Executes `lgdt`, refreshes CS/DS/ES/SS, and loads the task
    /// register. Call exactly once per CPU, on that CPU, with interrupts
    /// disabled, after [`Self::build_tables`].
    ///
    /// # Safety
    /// The tables must have been built and this `PerCpu` must be the
    /// calling CPU's own descriptor with static lifetime.
    #[cfg(target_os = "none")]
    pub unsafe fn install_tables(&self) {
        let tables = self.tables.lock();
        unsafe {
            gdt::load_gdt(&tables.gdt);
            gdt::reload_segments(tables.selectors.kernel_cs, tables.selectors.kernel_ds);
            gdt::load_task_register(tables.selectors.tss);
        }
    }

    /// Update the Ring-0 entry stack. Called on every dispatch so a
    /// privilege-raising interrupt lands on the running task's own stack.
    pub fn set_rsp0(&self, top: VirtAddr) {
        self.tables.lock().tss.set_rsp0(top);
    }

    /// The currently programmed Ring-0 entry stack.
    #[must_use]
    pub fn rsp0(&self) -> VirtAddr {
        self.tables.lock().tss.rsp0()
    }

    /// Program an IST slot on this CPU's TSS.
    ///
    /// # Errors
    /// See [`Tss64::set_ist_slot`].
    pub fn set_ist_slot(&self, slot: u8, top: VirtAddr) -> Result<(), TssError> {
        self.tables.lock().tss.set_ist_slot(slot, top)
    }

    /// Read back an IST slot.
    ///
    /// # Errors
    /// See [`Tss64::ist_slot`].
    pub fn ist_slot(&self, slot: u8) -> Result<VirtAddr, TssError> {
        self.tables.lock().tss.ist_slot(slot)
    }

    /// Publish this descriptor as the calling CPU's identity.
    ///
    /// # Safety
    /// `self` must have static lifetime and belong to the calling CPU.
    /// Subsequent [`PerCpu::current`] calls on this CPU resolve to it.
    #[cfg(target_os = "none")]
    pub unsafe fn install_gs_base(&'static self) {
        // SAFETY: writing IA32_GS_BASE is legal at CPL 0.
        unsafe { gs::write_gs_base(core::ptr::from_ref(self) as u64) };
    }

    /// The calling CPU's own descriptor.
    ///
    /// # Panics
    /// If no descriptor has been published for this CPU (boot-ordering
    /// bug; fails fast).
    #[must_use]
    pub fn current() -> &'static Self {
        let ptr = current_ptr();
        assert!(
            !ptr.is_null(),
            "per-CPU descriptor not published for this CPU"
        );
        // SAFETY: the pointer was derived from a &'static PerCpu.
        unsafe { &*ptr }
    }

    /// Like [`Self::current`], but `None` before publication.
    #[must_use]
    pub fn try_current() -> Option<&'static Self> {
        let ptr = current_ptr();
        // SAFETY: as in `current`.
        (!ptr.is_null()).then(|| unsafe { &*ptr })
    }
}

impl Default for PerCpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
fn current_ptr() -> *const PerCpu {
    gs::read_gs_base() as *const PerCpu
}

#[cfg(not(target_os = "none"))]
fn current_ptr() -> *const PerCpu {
    CURRENT.with(|c| c.get())
}

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static CURRENT: core::cell::Cell<*const PerCpu> =
        const { core::cell::Cell::new(core::ptr::null()) };
}

/// Hosted stand-in for the GS-base publication: bind `cpu` as the calling
/// thread's descriptor for tests.
#[cfg(not(target_os = "none"))]
pub fn set_current_for_thread(cpu: &'static PerCpu) {
    CURRENT.with(|c| c.set(core::ptr::from_ref(cpu)));
}

#[cfg(target_os = "none")]
mod gs {
    //! IA32_GS_BASE accessors. Kernel code runs with the kernel GS base
    //! active, so a plain rdmsr/wrmsr pair is all that is needed here.

    const IA32_GS_BASE: u32 = 0xC000_0101;

    pub unsafe fn write_gs_base(value: u64) {
        let lo = value as u32;
        let hi = (value >> 32) as u32;
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") IA32_GS_BASE,
                in("eax") lo,
                in("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub fn read_gs_base() -> u64 {
        let lo: u32;
        let hi: u32;
        // SAFETY: reading IA32_GS_BASE is legal at CPL 0.
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") IA32_GS_BASE,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_flag_is_monotonic_and_idempotent() {
        let cpu = PerCpu::new();
        assert!(!cpu.is_online());
        assert!(cpu.set_online());
        assert!(!cpu.set_online());
        assert!(cpu.is_online());
    }

    #[test]
    fn build_tables_programs_rsp0() {
        let cpu = PerCpu::new();
        let top = VirtAddr::new(0xffff_ff00_0000_9000);
        cpu.build_tables(top);
        assert_eq!(cpu.rsp0(), top);
    }

    #[test]
    fn current_task_roundtrip() {
        let cpu = PerCpu::new();
        assert!(cpu.current_task().is_none());

        let task = Task::new(7, VirtAddr::new(0x1000), 0x8000);
        // SAFETY: `task` outlives the handle within this test.
        let handle = unsafe { TaskRef::new_unchecked(&task) };
        cpu.set_current_task(Some(handle));
        assert_eq!(cpu.current_task().unwrap().id(), 7);

        cpu.set_current_task(None);
        assert!(cpu.current_task().is_none());
    }

    #[test]
    fn current_resolves_through_thread_binding() {
        static CPU: PerCpu = PerCpu::new();
        CPU.assign(3, 6, false);

        set_current_for_thread(&CPU);
        assert_eq!(PerCpu::current().cpu_id(), 3);
        assert!(core::ptr::eq(PerCpu::current(), &CPU));
    }
}
