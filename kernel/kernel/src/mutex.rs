//! # Blocking ticket mutex
//!
//! The kernel's sleeping lock for critical sections too long to spin on.
//! A contended acquire suspends the calling task through the scheduler
//! seam instead of burning its CPU, and ownership hands off in strict
//! ticket order, so the lock is fair: no waiter can be overtaken.
//!
//! Two monotonic counters carry the whole protocol. `entries` hands every
//! arriving locker a ticket; `exits` counts completed critical sections.
//! The task whose ticket equals `exits` owns the lock; everyone else
//! parks on the intrusive wait queue until their ticket comes up. At any
//! instant `entries - exits` is the number of holders plus queued or
//! arriving waiters.
//!
//! Blocking rules: never acquire with interrupts disabled and never while
//! holding a spinlock. Debug builds assert the interrupt-flag half of
//! that contract. Interrupt handlers must use spinlocks instead.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use kernel_sync::RawSpin;
use kernel_task::sched;
use kernel_task::{Scheduler, Task, TaskRef, WaitQueue};

/// A fair, blocking mutual-exclusion lock around `T`.
pub struct TicketMutex<T> {
    /// Tickets handed out. Incremented by every `lock`/`try_lock` winner.
    entries: AtomicU64,
    /// Critical sections completed. The current owner's ticket.
    exits: AtomicU64,
    /// Protects `waiters`. Held only for queue surgery, never while
    /// blocking.
    queue_lock: RawSpin,
    waiters: UnsafeCell<WaitQueue>,
    /// Current holder, for diagnostics and deadlock debugging only.
    owner: AtomicPtr<Task>,
    data: UnsafeCell<T>,
}

// SAFETY: the ticket protocol enforces mutual exclusion over `data` and
// the queue spinlock over `waiters`; only T: Send may cross CPUs.
unsafe impl<T: Send> Sync for TicketMutex<T> {}
unsafe impl<T: Send> Send for TicketMutex<T> {}

impl<T> TicketMutex<T> {
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self {
            entries: AtomicU64::new(0),
            exits: AtomicU64::new(0),
            queue_lock: RawSpin::new(),
            waiters: UnsafeCell::new(WaitQueue::new()),
            owner: AtomicPtr::new(core::ptr::null_mut()),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, blocking the calling task until it owns it.
    ///
    /// # Panics
    /// In debug builds, if called with interrupts disabled. If contended
    /// before a scheduler is registered or outside any task.
    pub fn lock(&self) -> TicketMutexGuard<'_, T> {
        debug_assert!(
            kernel_hal::interrupts_enabled(),
            "ticket mutex acquired with interrupts disabled"
        );

        let ticket = self.entries.fetch_add(1, Ordering::AcqRel);
        if self.exits.load(Ordering::Acquire) != ticket {
            self.lock_contended(ticket);
        }

        self.note_owner();
        TicketMutexGuard { lock: self }
    }

    /// Slow path: publish the caller as a waiter and sleep out the turns
    /// ahead of it.
    fn lock_contended(&self, ticket: u64) {
        let sched = sched::scheduler();
        let task = sched
            .current_task()
            .expect("ticket mutex blocked outside a task context");

        // Enqueue under the queue lock, re-checking the exit counter so a
        // release that lands between the ticket grab and here cannot be
        // missed: either we see our turn now, or the releaser will see us
        // queued.
        self.queue_lock.lock();
        if self.exits.load(Ordering::Acquire) == ticket {
            // SAFETY: held by the `lock` call above.
            unsafe { self.queue_lock.unlock() };
            return;
        }
        // SAFETY: `waiters` is only touched under `queue_lock`.
        unsafe { &mut *self.waiters.get() }.insert_by_ticket(task, ticket);
        // SAFETY: as above.
        unsafe { self.queue_lock.unlock() };

        // Wakeups have token semantics, so one delivered before we finish
        // blocking is not lost; re-check the turn after every return.
        while self.exits.load(Ordering::Acquire) != ticket {
            sched.block_current_task();
        }
    }

    /// Try to acquire without ever blocking or queueing.
    ///
    /// A single compare-exchange on the entry counter from the current
    /// exit value: it can only succeed while no ticket is outstanding.
    pub fn try_lock(&self) -> Option<TicketMutexGuard<'_, T>> {
        let exits = self.exits.load(Ordering::Acquire);
        self.entries
            .compare_exchange(exits, exits + 1, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| {
                self.note_owner();
                TicketMutexGuard { lock: self }
            })
    }

    /// Whether some task currently holds the lock (diagnostic; the answer
    /// can be stale by the time the caller looks at it).
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.entries.load(Ordering::Acquire) > self.exits.load(Ordering::Acquire)
    }

    /// The current holder, if one is known.
    ///
    /// `None` both when unlocked and when the holder acquired before
    /// tasking was up.
    #[must_use]
    pub fn owner(&self) -> Option<TaskRef> {
        let ptr = self.owner.load(Ordering::Acquire);
        core::ptr::NonNull::new(ptr).map(|p| {
            // SAFETY: only live tasks are recorded as owners.
            unsafe { TaskRef::new_unchecked(p.as_ref()) }
        })
    }

    /// Mutable access when holding `&mut self` (no contention possible).
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn note_owner(&self) {
        let ptr = sched::try_scheduler()
            .and_then(Scheduler::current_task)
            .map_or(core::ptr::null_mut(), TaskRef::as_ptr);
        self.owner.store(ptr, Ordering::Release);
    }

    /// Release: retire this critical section and hand the lock to the
    /// next ticket's waiter if it is already queued.
    fn unlock(&self) {
        self.owner.store(core::ptr::null_mut(), Ordering::Release);
        let next_ticket = self.exits.fetch_add(1, Ordering::AcqRel) + 1;

        self.queue_lock.lock();
        // The queue is ordered by ticket, so only the head can match. A
        // non-matching head means the next owner has not enqueued yet; it
        // will see its turn in the pre-enqueue re-check instead.
        // SAFETY: `waiters` is only touched under `queue_lock`.
        let next = {
            let queue = unsafe { &mut *self.waiters.get() };
            if queue.front_ticket() == Some(next_ticket) {
                queue.pop_front()
            } else {
                None
            }
        };
        // SAFETY: held by the `lock` call above.
        unsafe { self.queue_lock.unlock() };

        if let Some(task) = next {
            sched::scheduler().wake_task(task);
        }
    }
}

/// RAII ownership of a [`TicketMutex`]; dropping releases the lock.
pub struct TicketMutexGuard<'a, T> {
    lock: &'a TicketMutex<T>,
}

impl<T> Deref for TicketMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard witnesses exclusive ownership.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for TicketMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for TicketMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
