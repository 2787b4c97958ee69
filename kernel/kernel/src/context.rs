//! # Per-CPU task switching
//!
//! Glue between the scheduler's choice of next task and the raw
//! register-level switch: updates the per-CPU descriptor (current task,
//! TSS `rsp0` for ring transitions) around [`context_switch`].
//!
//! A task with implausible stack bookkeeping is logged and switched to
//! anyway. Refusing the switch would strand the CPU with no task at
//! all, so degraded continuation is the lesser evil; the warning gives
//! the corruption a timestamp before any fault it may cause.

use core::cell::UnsafeCell;

use kernel_cpu::PerCpu;
use kernel_info::smp::MAX_CPUS;
use kernel_task::{CpuContext, TaskRef, context_switch};
use log::warn;

/// Smallest kernel stack we consider usable.
const MIN_PLAUSIBLE_STACK: u64 = 4096;

/// Landing slot for the outgoing register state when a CPU switches away
/// from its boot path, which has no [`Task`](kernel_task::Task) to save
/// into. One slot per CPU, only ever touched by its own CPU.
struct BootContext(UnsafeCell<CpuContext>);

// SAFETY: slot `i` is only accessed by CPU `i`, single-threaded by
// construction.
unsafe impl Sync for BootContext {}

impl BootContext {
    const fn new() -> Self {
        Self(UnsafeCell::new(CpuContext::new()))
    }
}

static BOOT_CONTEXTS: [BootContext; MAX_CPUS] = [const { BootContext::new() }; MAX_CPUS];

/// Sanity-check a task's stack bookkeeping before switching to it.
fn stack_is_plausible(task: &kernel_task::Task) -> bool {
    let base = task.kstack_base();
    let top = task.kstack_top();
    !base.is_null()
        && top.as_u64() > base.as_u64()
        && top.is_aligned(16)
        && task.kstack_len() >= MIN_PLAUSIBLE_STACK
}

/// Switch this CPU to `next`.
///
/// Updates `rsp0` so interrupts taken in ring 3 land on `next`'s kernel
/// stack, publishes `next` as the CPU's current task, then performs the
/// register-level switch. Returns when something later switches back to
/// the previous task. Switching to the already-current task is a no-op.
pub fn switch_to_task(cpu: &PerCpu, next: TaskRef) {
    let next_task = next.get();
    if !stack_is_plausible(next_task) {
        warn!(
            "task {} has implausible stack (base {:#x}, len {}); switching anyway",
            next_task.id(),
            next_task.kstack_base().as_u64(),
            next_task.kstack_len(),
        );
    }

    cpu.set_rsp0(next_task.kstack_top());

    let prev = cpu.current_task();
    if let Some(prev) = prev {
        if prev.as_ptr() == next.as_ptr() {
            return;
        }
    }
    cpu.set_current_task(Some(next));

    let prev_ctx = match prev {
        Some(prev) => prev.get().context_ptr(),
        // First switch on this CPU; park the boot path's registers in
        // the per-CPU scratch slot.
        None => BOOT_CONTEXTS[cpu.cpu_id() as usize].0.get(),
    };

    // SAFETY: both context pointers are valid for the switch. `next`'s
    // context was prepared by `CpuContext::prepare_initial` or saved by
    // a previous switch away from it, and `prev_ctx` points either into
    // the previous task or into this CPU's private boot slot.
    unsafe { context_switch(prev_ctx, next_task.context_ptr()) };
}
