//! # Per-CPU Stack Layout
//!
//! Virtual layout constants for the per-CPU kernel stacks and the
//! Interrupt Stack Table (IST) stacks. Each CPU owns one fixed slot in a
//! dedicated higher-half region; within a slot, one unmapped 4 KiB guard
//! page sits below the mapped stack so an overflow traps instead of
//! silently corrupting the neighbour.

/// Size of one 4 KiB page, the granularity all stacks are mapped at.
pub const PAGE_SIZE: u64 = 4096;

/// The size of a per-CPU kernel stack in bytes.
pub const KERNEL_STACK_SIZE: u64 = 32 * 1024;

/// Size of the unmapped guard page below each stack.
pub const STACK_GUARD: u64 = PAGE_SIZE;

/// Virtual base address of the kernel-stack region.
///
/// Chosen in the canonical higher half, below the kernel image mapping and
/// far above user space, so all per-CPU stacks live in one contiguous,
/// predictable range.
pub const KSTACK_BASE: u64 = 0xffff_ff00_0000_0000;

/// Virtual span reserved per CPU in the kernel-stack region (bytes).
pub const KSTACK_CPU_STRIDE: u64 = 0x10_0000; // 1 MiB per CPU

/// Virtual base address for all IST stacks.
///
/// Kept disjoint from the kernel-stack region to simplify debugging and
/// avoid tight packing constraints.
pub const IST_BASE: u64 = 0xffff_ff10_0000_0000;

/// Per-CPU stride in the IST region (bytes).
pub const IST_CPU_STRIDE: u64 = 0x10_0000; // 1 MiB per CPU

/// Per-slot stride inside one CPU's IST area (bytes).
pub const IST_SLOT_STRIDE: u64 = 0x02_0000; // 128 KiB per slot

/// Usable bytes of one IST stack. 16 KiB is enough for the fault handlers
/// these stacks are dedicated to (#DF, NMI, #MC, #DB).
pub const IST_STACK_SIZE: u64 = 16 * 1024;

/// Number of hardware IST entries in the 64-bit TSS.
pub const IST_SLOTS_PER_CPU: u64 = 7;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_STACK_SIZE + STACK_GUARD <= KSTACK_CPU_STRIDE);
    assert!(IST_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(IST_STACK_SIZE + STACK_GUARD <= IST_SLOT_STRIDE);
    assert!(IST_SLOTS_PER_CPU * IST_SLOT_STRIDE <= IST_CPU_STRIDE);
    assert!(KSTACK_CPU_STRIDE.is_multiple_of(PAGE_SIZE));
    assert!(IST_SLOT_STRIDE.is_multiple_of(PAGE_SIZE));
};
