//! Saved execution context and the low-level switch.
//!
//! The switch is the classic callee-saved stack swap: the outgoing task
//! pushes the registers the System V ABI makes it responsible for plus
//! RFLAGS onto its own kernel stack, stores its stack pointer into its
//! [`CpuContext`], loads the incoming task's saved stack pointer and pops
//! the same frame back. Everything else a task owns already lives on its
//! stack at that point.
//!
//! A brand-new task has no frame to pop, so [`CpuContext::prepare_initial`]
//! lays a hand-built one: the restores land it in the startup trampoline,
//! which releases the scheduler's dispatch lock and tail-calls the task
//! entry point.

use crate::sched;
use kernel_addr::VirtAddr;

/// Entry point signature for a new task.
pub type TaskEntry = extern "C" fn(usize) -> !;

/// Initial RFLAGS for a new task: IF set, reserved bit 1 set.
const INITIAL_RFLAGS: u64 = 0x202;

/// Number of 8-byte slots in the switch frame:
/// RFLAGS, r15, r14, r13, r12, rbx, rbp, return address.
const SWITCH_FRAME_WORDS: u64 = 8;

/// A task's saved execution state between runs.
///
/// Only the kernel stack pointer is stored here; the register frame it
/// points at lives on the task's own stack.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    /// Kernel stack pointer at the moment the task was switched out.
    pub rsp: VirtAddr,
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rsp: VirtAddr::zero(),
        }
    }

    /// Build the first switch frame for a new task on its kernel stack.
    ///
    /// After [`context_switch`] restores this context, execution surfaces
    /// in the startup trampoline with `entry` and `arg` staged in r12/r13.
    ///
    /// # Safety
    /// `stack_top` must be the top of a writable region with at least
    /// [`SWITCH_FRAME_WORDS`] * 8 bytes below it, exclusively owned by the
    /// new task.
    #[must_use]
    pub unsafe fn prepare_initial(stack_top: VirtAddr, entry: TaskEntry, arg: usize) -> Self {
        let top = stack_top.align_down(16);
        let rsp = VirtAddr::new(top.as_u64() - SWITCH_FRAME_WORDS * 8);

        // Frame in pop order: RFLAGS, r15, r14, r13 (arg), r12 (entry),
        // rbx, rbp, return address.
        let frame: [u64; SWITCH_FRAME_WORDS as usize] = [
            INITIAL_RFLAGS,
            0,
            0,
            arg as u64,
            entry as usize as u64,
            0,
            0,
            task_startup_trampoline as usize as u64,
        ];

        let dst = rsp.as_u64() as *mut u64;
        for (i, word) in frame.iter().enumerate() {
            // SAFETY: in-bounds per the caller contract.
            unsafe { dst.add(i).write(*word) };
        }

        Self { rsp }
    }
}

/// Switch from the context in `prev` to the one in `next`.
///
/// Returns (to the caller in `prev`'s frame) when something later switches
/// back to `prev`.
///
/// # Safety
/// `prev` must be writable; `next` must hold a stack pointer produced by a
/// previous switch-out or by [`CpuContext::prepare_initial`]. Must run
/// with the dispatch lock held so no other CPU restores `prev` before its
/// save completes.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(prev: *mut CpuContext, next: *const CpuContext) {
    core::arch::naked_asm!(
        // Save the outgoing frame on its own stack.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "pushfq",
        "mov [rdi], rsp",
        // Adopt the incoming stack and restore its frame.
        "mov rsp, [rsi]",
        "popfq",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Hosted stand-in for the stack switch.
///
/// Unit tests exercise the bookkeeping around a dispatch (TSS rsp0,
/// current-task pointer, bounds checks); the register transfer itself only
/// exists on bare metal.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub unsafe extern "C" fn context_switch(_prev: *mut CpuContext, _next: *const CpuContext) {}

/// First Rust code of a freshly created task.
///
/// The scheduler holds its dispatch lock across task construction so the
/// task cannot be picked while half-built; the new task itself is the
/// first point where releasing it is safe again. After that, fall into
/// the entry point and never return.
pub extern "C" fn task_startup_wrapper(entry: TaskEntry, arg: usize) -> ! {
    sched::scheduler().startup_unlock();
    entry(arg)
}

/// Assembly thunk the initial frame returns into: moves the staged
/// `entry`/`arg` from r12/r13 into argument registers and jumps to
/// [`task_startup_wrapper`].
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[unsafe(naked)]
extern "C" fn task_startup_trampoline() -> ! {
    core::arch::naked_asm!(
        "mov rdi, r12",
        "mov rsi, r13",
        "jmp {wrapper}",
        wrapper = sym task_startup_wrapper,
    );
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
extern "C" fn task_startup_trampoline() -> ! {
    unreachable!("startup trampoline executed on a hosted build");
}

#[cfg(test)]
mod tests {
    use super::{CpuContext, INITIAL_RFLAGS, TaskEntry};
    use kernel_addr::VirtAddr;

    extern "C" fn dummy_entry(_arg: usize) -> ! {
        unreachable!()
    }

    #[test]
    fn initial_frame_layout() {
        // A real enough stack: 4 KiB buffer, top at its end.
        let mut stack = vec![0u8; 4096];
        let base = stack.as_mut_ptr() as u64;
        let top = VirtAddr::new(base + 4096);

        let ctx = unsafe { CpuContext::prepare_initial(top, dummy_entry, 0xDEAD) };

        let rsp = ctx.rsp;
        assert!(rsp.is_aligned(8));
        assert_eq!(top.align_down(16) - rsp, 64);

        let words: [u64; 8] =
            core::array::from_fn(|i| unsafe { (rsp.as_u64() as *const u64).add(i).read() });

        assert_eq!(words[0], INITIAL_RFLAGS);
        assert_eq!(words[3], 0xDEAD, "arg staged for r13");
        assert_eq!(
            words[4], dummy_entry as TaskEntry as usize as u64,
            "entry staged for r12"
        );
        assert_ne!(words[7], 0, "return address must be the trampoline");
    }
}
