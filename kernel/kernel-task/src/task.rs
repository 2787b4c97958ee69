use crate::context::CpuContext;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use kernel_addr::VirtAddr;

/// A kernel task as seen by the synchronization core.
///
/// Identity, kernel-stack bounds, the saved execution context and the
/// embedded wait-queue node — everything the locks and the context switch
/// touch. Lifecycle, priority and address-space ownership live with the
/// scheduler and are none of this crate's business.
pub struct Task {
    id: u64,
    kstack_base: VirtAddr,
    kstack_len: u64,
    /// Saved context. Written only by the context switch on the CPU that
    /// owns the task at that moment.
    context: UnsafeCell<CpuContext>,
    /// Intrusive wait-queue link. Mutated only under the wait queue's
    /// external lock.
    wait_next: AtomicPtr<Task>,
    /// Ticket this task is waiting on while queued (diagnostic; also used
    /// to assert FIFO hand-off order in debug builds).
    wait_ticket: AtomicU64,
}

// SAFETY: `context` is only touched by the owning CPU during a switch and
// `wait_next`/`wait_ticket` only under the owning queue's lock.
unsafe impl Sync for Task {}
unsafe impl Send for Task {}

impl Task {
    /// Create a task descriptor over an existing kernel stack region.
    #[must_use]
    pub const fn new(id: u64, kstack_base: VirtAddr, kstack_len: u64) -> Self {
        Self {
            id,
            kstack_base,
            kstack_len,
            context: UnsafeCell::new(CpuContext::new()),
            wait_next: AtomicPtr::new(core::ptr::null_mut()),
            wait_ticket: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Lowest address of the kernel stack region.
    #[must_use]
    pub const fn kstack_base(&self) -> VirtAddr {
        self.kstack_base
    }

    /// Mapped length of the kernel stack region in bytes.
    #[must_use]
    pub const fn kstack_len(&self) -> u64 {
        self.kstack_len
    }

    /// Highest usable stack address, aligned down to 16 bytes as the ABI
    /// requires of a stack pointer at entry.
    #[must_use]
    pub const fn kstack_top(&self) -> VirtAddr {
        VirtAddr::new(self.kstack_base.as_u64().wrapping_add(self.kstack_len)).align_down(16)
    }

    /// Raw pointer to the saved context, for the low-level switch.
    #[must_use]
    pub const fn context_ptr(&self) -> *mut CpuContext {
        self.context.get()
    }

    /// Ticket this task is (or was last) blocked on.
    #[must_use]
    pub fn wait_ticket(&self) -> u64 {
        self.wait_ticket.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kstack_base", &self.kstack_base)
            .field("kstack_len", &self.kstack_len)
            .finish_non_exhaustive()
    }
}

/// A shared, copyable handle to a [`Task`].
///
/// The synchronization core never owns tasks; it passes these around. The
/// pointee must stay alive for as long as any handle to it is in use —
/// which holds by construction in the kernel, where a task outlives every
/// queue it can possibly sit in.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct TaskRef(NonNull<Task>);

// SAFETY: a TaskRef is a shared reference in disguise; Task itself is
// Sync, and the liveness contract is on the constructor.
unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

impl TaskRef {
    /// Handle to a task with static lifetime.
    #[must_use]
    pub const fn from_static(task: &'static Task) -> Self {
        Self(NonNull::from_ref(task))
    }

    /// Handle to a task with a non-static lifetime.
    ///
    /// # Safety
    /// The task must outlive every use of the returned handle (including
    /// copies of it sitting in wait queues or per-CPU fields).
    #[must_use]
    pub const unsafe fn new_unchecked(task: &Task) -> Self {
        Self(NonNull::from_ref(task))
    }

    #[must_use]
    pub const fn as_ptr(self) -> *mut Task {
        self.0.as_ptr()
    }

    /// Borrow the task.
    #[must_use]
    pub fn get(&self) -> &Task {
        // SAFETY: liveness is guaranteed by the constructor contract.
        unsafe { self.0.as_ref() }
    }
}

impl core::ops::Deref for TaskRef {
    type Target = Task;

    fn deref(&self) -> &Task {
        self.get()
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskRef(#{})", self.get().id())
    }
}

/// Intrusive FIFO of blocked tasks.
///
/// Links run through the tasks' embedded wait nodes; pushing and popping
/// never allocates. The queue itself is not synchronized — callers wrap it
/// in a lock (the ticket mutex keeps it under its internal spinlock).
pub struct WaitQueue {
    head: Option<TaskRef>,
    tail: Option<TaskRef>,
    len: usize,
}

// SAFETY: the contained raw task pointers are plain shared handles.
unsafe impl Send for WaitQueue {}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `task` as the newest waiter, recording the ticket it waits on.
    ///
    /// The task must not already be queued anywhere; an embedded node can
    /// link into exactly one queue at a time.
    pub fn push_back(&mut self, task: TaskRef, ticket: u64) {
        task.wait_next
            .store(core::ptr::null_mut(), Ordering::Relaxed);
        task.wait_ticket.store(ticket, Ordering::Relaxed);

        match self.tail {
            Some(tail) => tail.wait_next.store(task.as_ptr(), Ordering::Relaxed),
            None => self.head = Some(task),
        }
        self.tail = Some(task);
        self.len += 1;
    }

    /// Insert `task` ordered by ascending ticket.
    ///
    /// Tickets are handed out monotonically, but two takers can reach the
    /// queue lock out of order; ordered insertion keeps the head the
    /// oldest outstanding ticket regardless. The common in-order case is
    /// a plain append.
    pub fn insert_by_ticket(&mut self, task: TaskRef, ticket: u64) {
        let Some(tail) = self.tail else {
            self.push_back(task, ticket);
            return;
        };
        if tail.wait_ticket() <= ticket {
            self.push_back(task, ticket);
            return;
        }

        task.wait_ticket.store(ticket, Ordering::Relaxed);

        // Out-of-order enqueue: walk from the head to the first waiter
        // with a younger ticket and splice in before it.
        let mut prev: Option<TaskRef> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c.wait_ticket() > ticket {
                break;
            }
            prev = cur;
            cur = NonNull::new(c.wait_next.load(Ordering::Relaxed)).map(TaskRef);
        }

        let cur = cur.expect("tail comparison guarantees a younger waiter exists");
        task.wait_next.store(cur.as_ptr(), Ordering::Relaxed);
        match prev {
            Some(p) => p.wait_next.store(task.as_ptr(), Ordering::Relaxed),
            None => self.head = Some(task),
        }
        self.len += 1;
    }

    /// Remove and return the oldest waiter.
    pub fn pop_front(&mut self) -> Option<TaskRef> {
        let head = self.head?;
        let next = head.wait_next.swap(core::ptr::null_mut(), Ordering::Relaxed);
        self.head = NonNull::new(next).map(TaskRef);
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }

    /// Ticket the oldest waiter is blocked on, if any.
    #[must_use]
    pub fn front_ticket(&self) -> Option<u64> {
        self.head.map(|t| t.wait_ticket())
    }
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskRef, WaitQueue};
    use kernel_addr::VirtAddr;

    fn task(id: u64) -> Task {
        Task::new(id, VirtAddr::new(0xffff_ff00_0000_1000), 32 * 1024)
    }

    #[test]
    fn stack_top_is_aligned() {
        let t = Task::new(1, VirtAddr::new(0x1000), 0x4321);
        assert!(t.kstack_top().is_aligned(16));
        assert!(t.kstack_top().as_u64() <= 0x1000 + 0x4321);
    }

    #[test]
    fn wait_queue_is_fifo() {
        let a = task(1);
        let b = task(2);
        let c = task(3);

        let mut q = WaitQueue::new();
        assert!(q.is_empty());

        unsafe {
            q.push_back(TaskRef::new_unchecked(&a), 10);
            q.push_back(TaskRef::new_unchecked(&b), 11);
            q.push_back(TaskRef::new_unchecked(&c), 12);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.front_ticket(), Some(10));

        assert_eq!(q.pop_front().map(|t| t.id()), Some(1));
        assert_eq!(q.pop_front().map(|t| t.id()), Some(2));
        assert_eq!(q.pop_front().map(|t| t.id()), Some(3));
        assert!(q.pop_front().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn ordered_insert_repairs_racy_enqueue_order() {
        let a = task(1);
        let b = task(2);
        let c = task(3);
        let d = task(4);

        let mut q = WaitQueue::new();
        unsafe {
            // Ticket 6 reached the queue before 5; 7 and 8 arrive in order.
            q.insert_by_ticket(TaskRef::new_unchecked(&b), 6);
            q.insert_by_ticket(TaskRef::new_unchecked(&a), 5);
            q.insert_by_ticket(TaskRef::new_unchecked(&c), 7);
            q.insert_by_ticket(TaskRef::new_unchecked(&d), 8);
        }

        assert_eq!(q.len(), 4);
        assert_eq!(q.front_ticket(), Some(5));
        let order: Vec<u64> = core::iter::from_fn(|| q.pop_front().map(|t| t.id())).collect();
        assert_eq!(order, [1, 2, 3, 4]);
    }

    #[test]
    fn popped_task_can_requeue() {
        let a = task(1);
        let mut q = WaitQueue::new();
        unsafe {
            let r = TaskRef::new_unchecked(&a);
            q.push_back(r, 1);
            let popped = q.pop_front().unwrap();
            q.push_back(popped, 2);
        }
        assert_eq!(q.front_ticket(), Some(2));
        assert_eq!(q.pop_front().map(|t| t.id()), Some(1));
    }
}
