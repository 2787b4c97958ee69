//! # Global Descriptor Table wiring for long mode
//!
//! Classic segmentation is largely disabled in 64-bit mode, but selectors
//! still matter: they distinguish code from data/stack, they carry the
//! DPL the CPU enforces on privilege transitions, and they locate the TSS
//! through a 16-byte system descriptor so the CPU can fetch `rsp0` and
//! IST stacks on privilege changes and fault delivery.
//!
//! ## Layout
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (64-bit, DPL=0; [`KERNEL_CS_SEL`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS_SEL`])
//! 3     | 0x18     | User   data (DPL=3) with RPL=3: **0x1b** ([`USER_DS_SEL`])
//! 4     | 0x20     | User   code (64-bit, DPL=3) with RPL=3: **0x23** ([`USER_CS_SEL`])
//! 5/6   | 0x28     | TSS (16-byte system descriptor; [`TSS_SYS_SEL`])
//!
//! Kernel data one index after kernel code, and user data one index
//! before user code, is the ordering `SYSCALL`/`SYSRET` require.
//!
//! The table is per-CPU: every processor builds and loads its own copy
//! during bring-up, since each TSS descriptor points at that CPU's
//! private TSS.

pub mod descriptors;
pub mod selectors;
pub mod tss_desc;

use crate::gdt::descriptors::Desc64;
use crate::gdt::selectors::{CodeSel, DataSel, SegmentSelector, TssSel};
use crate::gdt::tss_desc::TssDesc64;
use crate::privilege::{Dpl, Rpl};
use kernel_addr::VirtAddr;

/// The selector set matching the fixed layout above.
#[derive(Copy, Clone)]
pub struct Selectors {
    pub kernel_cs: SegmentSelector<CodeSel>,
    pub kernel_ds: SegmentSelector<DataSel>,
    pub user_ds: SegmentSelector<DataSel>,
    pub user_cs: SegmentSelector<CodeSel>,
    pub tss: SegmentSelector<TssSel>,
}

impl Selectors {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kernel_cs: KERNEL_CS_SEL,
            kernel_ds: KERNEL_DS_SEL,
            user_ds: USER_DS_SEL,
            user_cs: USER_CS_SEL,
            tss: TSS_SYS_SEL,
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self::new()
    }
}

// Well-known selectors matching the fixed GDT layout.
//
// The `*_SEL` are typed wrappers; the bare constants are the encoded
// `u16` values (for inline asm and iret frames).
pub const KERNEL_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(1, Rpl::Ring0);
pub const KERNEL_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(2, Rpl::Ring0);
pub const USER_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(3, Rpl::Ring3);
pub const USER_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(4, Rpl::Ring3);
pub const TSS_SYS_SEL: SegmentSelector<TssSel> = SegmentSelector::<TssSel>::new(5);

pub const KERNEL_CS: u16 = KERNEL_CS_SEL.encode(); // 0x08
pub const KERNEL_DS: u16 = KERNEL_DS_SEL.encode(); // 0x10
pub const USER_DS: u16 = USER_DS_SEL.encode(); // 0x1b
pub const USER_CS: u16 = USER_CS_SEL.encode(); // 0x23
pub const TSS_SEL: u16 = TSS_SYS_SEL.encode(); // 0x28

// Compile-time sanity checks for the selector encodings.
const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(USER_DS == 0x1b);
    assert!(USER_CS == 0x23);
    assert!(TSS_SEL == 0x28);

    // Encoding formula: (index << 3) | (TI=0) | RPL
    const fn enc(index: u16, rpl: u16) -> u16 {
        (index << 3) | rpl
    }

    assert!(KERNEL_CS == enc(1, 0));
    assert!(KERNEL_DS == enc(2, 0));
    assert!(USER_DS == enc(3, 3));
    assert!(USER_CS == enc(4, 3));
    assert!(TSS_SEL == enc(5, 0));
};

/// Pointer format required by `lgdt`.
///
/// The CPU reads exactly `limit + 1` bytes starting at `base`.
#[cfg(target_os = "none")]
#[repr(C, packed)]
struct DescTablePtr {
    /// Size of the table minus one, in bytes.
    limit: u16,
    /// Base linear (virtual) address of the table.
    base: VirtAddr,
}

/// One CPU's complete GDT.
///
/// The TSS occupies two consecutive entries (16-byte system descriptor).
/// Exactly seven 8-byte entries with no padding, so the `lgdt` limit is
/// `size_of - 1` and the size guard below holds.
#[repr(C)]
pub struct Gdt {
    /// Null descriptor (must be present at index 0).
    null: Desc64, // 0
    /// Kernel code segment (64-bit, DPL=0).
    kcode: Desc64, // 1
    /// Kernel data/stack segment (DPL=0).
    /// Must be one index after `kcode` for `SYSCALL`.
    kdata: Desc64, // 2
    /// User data/stack segment (DPL=3).
    /// Must be one index before `ucode` for `SYSRET`.
    udata: Desc64, // 3
    /// User code segment (64-bit, DPL=3).
    ucode: Desc64, // 4
    /// 64-bit Available TSS descriptor (low+high).
    tss: TssDesc64, // 5 & 6
}

impl Gdt {
    #[must_use]
    pub const fn new_with_tss(tss: TssDesc64) -> Self {
        Self {
            null: Desc64::null(),
            kcode: Desc64::from_code_dpl(Dpl::Ring0),
            kdata: Desc64::from_data_dpl(Dpl::Ring0),
            udata: Desc64::from_data_dpl(Dpl::Ring3),
            ucode: Desc64::from_code_dpl(Dpl::Ring3),
            tss,
        }
    }

    /// A table whose TSS descriptor still points at address zero.
    #[must_use]
    pub const fn new() -> Self {
        Self::new_with_tss(TssDesc64::new(VirtAddr::zero(), 0))
    }

    /// Replace the TSS descriptor (done once per CPU during bring-up,
    /// before the table is loaded).
    pub const fn set_tss(&mut self, tss: TssDesc64) {
        self.tss = tss;
    }
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(size_of::<Gdt>() == 7 * 8);

/// Load a GDT with `lgdt`.
///
/// # Safety
/// - `gdt` must point to a fully initialized table whose memory remains
///   mapped and readable for the lifetime of the CPU.
/// - No interrupt or fault may observe a half-installed state; run with
///   interrupts disabled.
#[cfg(target_os = "none")]
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) unsafe fn load_gdt(gdt: &Gdt) {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: VirtAddr::from_ptr(core::ptr::from_ref(gdt)),
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

/// Refresh CS/DS/ES/SS against the freshly loaded table.
///
/// CS cannot be `mov`-ed in long mode; a far return does the reload.
///
/// # Safety
/// The current GDT must contain valid kernel code/data descriptors at the
/// given selectors.
#[cfg(target_os = "none")]
pub(crate) unsafe fn reload_segments(
    kernel_cs: SegmentSelector<CodeSel>,
    kernel_ds: SegmentSelector<DataSel>,
) {
    let kds = kernel_ds.encode();
    let kcs = kernel_cs.encode();
    unsafe {
        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov ss, {0:x}",
            in(reg) kds,
            options(nostack, preserves_flags)
        );

        core::arch::asm!(
            // push target CS and RIP, then far return
            "push {cs}",
            "lea rax, [rip + 2f]",
            "push rax",
            "retfq",
            "2:",
            cs = in(reg) u64::from(kcs),
            out("rax") _,
            options(nostack)
        );
    }
}

/// Load the task register with a TSS selector.
///
/// # Safety
/// The current GDT must hold a present 64-bit Available TSS descriptor at
/// `sel`, and the TSS memory must stay resident; the CPU reads it on
/// traps and privilege changes.
#[cfg(target_os = "none")]
#[inline]
pub(crate) unsafe fn load_task_register(sel: SegmentSelector<TssSel>) {
    let sel = sel.encode();
    unsafe {
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) sel,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_entries_in_syscall_order() {
        let gdt = Gdt::new();
        // SYSCALL expects kernel data directly after kernel code, SYSRET
        // expects user data directly before user code.
        assert_eq!(gdt.kcode.to_u64(), Desc64::from_code_dpl(Dpl::Ring0).to_u64());
        assert_eq!(gdt.kdata.to_u64(), Desc64::from_data_dpl(Dpl::Ring0).to_u64());
        assert_eq!(gdt.udata.to_u64(), Desc64::from_data_dpl(Dpl::Ring3).to_u64());
        assert_eq!(gdt.ucode.to_u64(), Desc64::from_code_dpl(Dpl::Ring3).to_u64());
        assert_eq!(gdt.null.to_u64(), 0);
    }

    #[test]
    fn table_is_densely_packed() {
        // `lgdt` limit arithmetic assumes no trailing padding.
        assert_eq!(size_of::<Gdt>(), 7 * 8);
        assert_eq!(align_of::<Gdt>(), align_of::<Desc64>());
    }

    #[test]
    fn tss_descriptor_slot_tracks_set_tss() {
        let mut gdt = Gdt::new();
        let base = VirtAddr::new(0xffff_8000_dead_0000);
        gdt.set_tss(TssDesc64::new(base, 103));
        assert_eq!(gdt.tss.low.base_lo(), 0x0000);
        assert_eq!(gdt.tss.high.base_upper(), 0xffff_8000);
    }
}
