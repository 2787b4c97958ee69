//! # Per-CPU stack slot layout
//!
//! Fixed virtual slots for the per-CPU kernel stacks and IST stacks.
//! Every CPU owns one kernel-stack slot and seven IST slots at addresses
//! that are a pure function of its logical id, so stack addresses can be
//! computed (and checked) without any allocation table.
//!
//! Layout within one slot:
//! ```text
//! slot base -> [ guard page (4 KiB, unmapped) ][ stack bytes, RW|NX ]
//! ```
//! The unmapped guard below each stack turns an overflow into a page
//! fault instead of silent corruption of the neighbouring slot.

use crate::tss::Ist;
use kernel_addr::VirtAddr;
use kernel_info::memory::{
    IST_BASE, IST_CPU_STRIDE, IST_SLOT_STRIDE, IST_STACK_SIZE, KERNEL_STACK_SIZE, KSTACK_BASE,
    KSTACK_CPU_STRIDE, STACK_GUARD,
};
use kernel_info::smp::MAX_CPUS;

/// Guard-page base of the kernel-stack slot for `cpu_id`.
///
/// The first mapped byte is one guard page above this.
#[must_use]
pub const fn kstack_slot_for_cpu(cpu_id: u32) -> VirtAddr {
    assert!((cpu_id as usize) < MAX_CPUS);
    VirtAddr::new(KSTACK_BASE + cpu_id as u64 * KSTACK_CPU_STRIDE)
}

/// First mapped byte of the kernel stack for `cpu_id`.
#[must_use]
pub const fn kstack_base_for_cpu(cpu_id: u32) -> VirtAddr {
    VirtAddr::new(kstack_slot_for_cpu(cpu_id).as_u64() + STACK_GUARD)
}

/// 16-byte-aligned initial stack pointer for `cpu_id`'s kernel stack.
#[must_use]
pub const fn kstack_top_for_cpu(cpu_id: u32) -> VirtAddr {
    VirtAddr::new(kstack_base_for_cpu(cpu_id).as_u64() + KERNEL_STACK_SIZE).align_down(16)
}

/// Guard-page base of the IST slot `ist` for `cpu_id`.
#[must_use]
pub const fn ist_slot_for_cpu(cpu_id: u32, ist: Ist) -> VirtAddr {
    assert!((cpu_id as usize) < MAX_CPUS);
    let cpu_off = cpu_id as u64 * IST_CPU_STRIDE;
    let ist_off = (ist.slot() as u64 - 1) * IST_SLOT_STRIDE;
    VirtAddr::new(IST_BASE + cpu_off + ist_off)
}

/// 16-byte-aligned initial stack pointer for an IST stack.
#[must_use]
pub const fn ist_top_for_cpu(cpu_id: u32, ist: Ist) -> VirtAddr {
    VirtAddr::new(ist_slot_for_cpu(cpu_id, ist).as_u64() + STACK_GUARD + IST_STACK_SIZE)
        .align_down(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stack_slots_are_disjoint() {
        let top0 = kstack_top_for_cpu(0);
        let slot1 = kstack_slot_for_cpu(1);
        // CPU 0's stack (and anything it could overflow into) ends below
        // CPU 1's guard page.
        assert!(top0.as_u64() <= slot1.as_u64());
        assert!(top0.is_aligned(16));
        assert_eq!(
            slot1.as_u64() - kstack_slot_for_cpu(0).as_u64(),
            KSTACK_CPU_STRIDE
        );
    }

    #[test]
    fn guard_page_sits_below_the_stack() {
        let slot = kstack_slot_for_cpu(2);
        let base = kstack_base_for_cpu(2);
        assert_eq!(base.as_u64() - slot.as_u64(), STACK_GUARD);
    }

    #[test]
    fn ist_slots_are_disjoint_within_a_cpu() {
        let df = ist_slot_for_cpu(0, Ist::DoubleFault);
        let nmi = ist_slot_for_cpu(0, Ist::Nmi);
        assert_eq!(nmi.as_u64() - df.as_u64(), IST_SLOT_STRIDE);

        let top = ist_top_for_cpu(0, Ist::DoubleFault);
        assert!(top.as_u64() <= nmi.as_u64());
        assert!(top.is_aligned(16));
    }

    #[test]
    fn ist_regions_do_not_overlap_kernel_stacks() {
        let last_kstack = kstack_slot_for_cpu((MAX_CPUS - 1) as u32).as_u64() + KSTACK_CPU_STRIDE;
        assert!(last_kstack <= IST_BASE);
    }

    #[test]
    fn tops_are_canonical() {
        assert!(kstack_top_for_cpu(0).is_canonical());
        assert!(ist_top_for_cpu((MAX_CPUS - 1) as u32, Ist::Debug).is_canonical());
    }
}
