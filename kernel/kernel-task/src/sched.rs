//! Scheduler collaborator seam.
//!
//! The blocking mutex and the startup trampoline need four things from the
//! scheduler; everything else (ready queues, priorities, time slices) is
//! opaque to this core. The scheduler registers itself once during boot,
//! and the primitives reach it through [`scheduler`].
//!
//! Contract for implementors: a [`wake_task`](Scheduler::wake_task)
//! delivered while the target is still on its way into
//! [`block_current_task`](Scheduler::block_current_task) must not be lost
//! (token semantics). Waiters re-check their wake condition after every
//! return from blocking, so spurious wakeups are harmless.

use crate::TaskRef;
use kernel_sync::SyncOnceCell;

/// The block/wake interface the scheduler exposes to this core.
pub trait Scheduler: Sync {
    /// The task currently running on the calling CPU, or `None` if the
    /// CPU is idle (or tasking has not started yet).
    fn current_task(&self) -> Option<TaskRef>;

    /// Suspend the calling task until somebody wakes it. May return
    /// spuriously; callers must re-check their condition.
    fn block_current_task(&self);

    /// Make a previously blocked task runnable again.
    fn wake_task(&self, task: TaskRef);

    /// Release the dispatch lock that was deliberately held across task
    /// construction. Called exactly once per task, as its first action.
    fn startup_unlock(&self);
}

static SCHEDULER: SyncOnceCell<&'static dyn Scheduler> = SyncOnceCell::new();

/// Register the scheduler. Effective once; later calls return `false`.
pub fn set_scheduler(scheduler: &'static dyn Scheduler) -> bool {
    let registered = SCHEDULER.set(scheduler).is_ok();
    if registered {
        log::debug!("scheduler registered, blocking primitives are live");
    }
    registered
}

/// The registered scheduler, if any.
#[must_use]
pub fn try_scheduler() -> Option<&'static dyn Scheduler> {
    SCHEDULER.get().copied()
}

/// The registered scheduler.
///
/// # Panics
/// If no scheduler has been registered. Reaching a blocking primitive
/// before tasking is up is a boot-ordering bug and fails fast.
#[must_use]
pub fn scheduler() -> &'static dyn Scheduler {
    try_scheduler().expect("blocking primitive used before a scheduler was registered")
}
