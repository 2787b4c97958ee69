//! # Task Descriptor & Scheduler Seam
//!
//! The task-side types the synchronization core needs, without any
//! scheduling policy:
//!
//! - [`Task`] / [`TaskRef`]: a task's identity, kernel-stack bounds, saved
//!   CPU context and the embedded wait-queue node.
//! - [`WaitQueue`]: intrusive FIFO of blocked tasks; a node's lifetime is
//!   its task's lifetime and nothing is ever allocated for waiting.
//! - [`sched`]: the collaborator interface to the scheduler proper
//!   (`block_current_task` / `wake_task` / …). Ready-queue and priority
//!   policy stay entirely on the scheduler's side of this seam.
//! - [`context`]: the saved-register context, the low-level stack switch
//!   and the startup trampoline new tasks run first.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod context;
pub mod sched;
mod task;

pub use context::{CpuContext, TaskEntry, context_switch, task_startup_wrapper};
pub use sched::Scheduler;
pub use task::{Task, TaskRef, WaitQueue};
