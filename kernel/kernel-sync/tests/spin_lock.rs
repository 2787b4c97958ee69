//! Mutual exclusion and guard behavior of the plain spinlock.
//!
//! Hosted `std` threads stand in for CPUs; the lock itself has no idea
//! which it is running on.

use kernel_sync::SpinLock;
use std::panic;

#[test]
fn guard_drop_releases() {
    let l = SpinLock::new(0_u32);

    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }

    // The drop above must have released; a fresh lock sees the write.
    let mut g = l.lock();
    *g += 1;
    assert_eq!(*g, 42);
}

#[test]
fn try_lock_fails_only_while_held() {
    let l = SpinLock::new(1u8);

    let held = l.try_lock().expect("uncontended try_lock must succeed");
    assert!(l.is_locked());
    assert!(l.try_lock().is_none());

    drop(held);
    assert!(!l.is_locked());
    assert!(l.try_lock().is_some());
}

#[test]
fn with_lock_returns_closure_value_and_unlocks() {
    let l = SpinLock::new(String::from("a"));
    let len = l.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);

    let got = l.with_lock(|s| s.clone());
    assert_eq!(got, "ab");
}

#[test]
fn get_mut_needs_no_locking() {
    let mut l = SpinLock::new(vec![1, 2, 3]);
    // &mut self already proves exclusivity.
    l.get_mut().push(4);
    assert_eq!(l.lock().as_slice(), &[1, 2, 3, 4]);
}

#[test]
fn contended_counts_stay_exact() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    const THREADS: usize = 8;
    const ITERS: usize = 5_000;

    let lock = Arc::new(SpinLock::new(0usize));
    // Tracks how many threads believe they are inside the critical
    // section; any value above 1 is an exclusion violation.
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..ITERS {
                    lock.with_lock(|v| {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *v += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), THREADS * ITERS);
    assert_eq!(inside.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_critical_section_still_unlocks() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err());

    // The guard unwound through Drop, so the lock is free again and the
    // write before the panic stuck.
    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn spinlock_of_send_data_is_sync() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&SpinLock::new(0u8));
}
