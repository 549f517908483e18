//! Thread-interleaving tests for RefMutex.
//!
//! Blocking assertions use channels with timeouts: a short timeout proves a
//! lock attempt is (still) blocked, a generous one proves it eventually goes
//! through.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use refutils::RefMutex;

const BLOCKED_WINDOW: Duration = Duration::from_millis(200);
const UNBLOCK_DEADLINE: Duration = Duration::from_secs(5);

/// Assert that nothing arrives on `rx` within the blocked window.
fn assert_blocked(rx: &Receiver<()>, message: &str) {
    assert!(
        rx.recv_timeout(BLOCKED_WINDOW).is_err(),
        "{message}"
    );
}

/// Assert that something arrives on `rx` before the deadline.
fn assert_unblocked(rx: &Receiver<()>, message: &str) {
    assert!(
        rx.recv_timeout(UNBLOCK_DEADLINE).is_ok(),
        "{message}"
    );
}

#[test]
fn ref_locks_exclude_master_lock_until_drained() {
    let mutex = Arc::new(RefMutex::new());

    mutex.ref_lock();
    mutex.ref_lock();
    mutex.ref_lock();

    let (tx, rx): (Sender<()>, Receiver<()>) = mpsc::channel();
    let contender = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            mutex.master_lock();
            tx.send(()).expect("test channel closed");
            mutex.master_unlock();
        })
    };

    assert_blocked(&rx, "obtained master-lock while ref-locked");

    mutex.ref_unlock();
    mutex.ref_unlock();
    assert_blocked(&rx, "obtained master-lock while ref-locked");

    mutex.ref_unlock();
    assert_unblocked(&rx, "failed to obtain master-lock once ref-locks drained");

    contender.join().expect("master-lock thread panicked");
}

#[test]
fn master_lock_excludes_ref_locks() {
    let mutex = Arc::new(RefMutex::new());
    mutex.master_lock();

    let (tx, rx): (Sender<()>, Receiver<()>) = mpsc::channel();
    let mut holders = Vec::new();
    for _ in 0..3 {
        let mutex = Arc::clone(&mutex);
        let tx = tx.clone();
        holders.push(thread::spawn(move || {
            mutex.ref_lock();
            tx.send(()).expect("test channel closed");
            mutex.ref_unlock();
        }));
    }

    assert_blocked(&rx, "obtained ref-lock while master-locked");

    mutex.master_unlock();

    for _ in 0..3 {
        assert_unblocked(&rx, "failed to obtain ref-lock once master-lock released");
    }
    for holder in holders {
        holder.join().expect("ref-lock thread panicked");
    }
}

#[test]
fn ref_locks_inside_a_generation_do_not_block() {
    let mutex = Arc::new(RefMutex::new());

    // First holder opens the generation.
    mutex.ref_lock();

    // Later holders must get in even with a master-lock request pending.
    let (pending_tx, pending_rx) = mpsc::channel();
    let pending = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            mutex.master_lock();
            pending_tx.send(()).expect("test channel closed");
            mutex.master_unlock();
        })
    };
    assert_blocked(&pending_rx, "obtained master-lock while ref-locked");

    let (tx, rx) = mpsc::channel();
    for _ in 0..4 {
        let mutex = Arc::clone(&mutex);
        let tx = tx.clone();
        thread::spawn(move || {
            mutex.ref_lock();
            tx.send(()).expect("test channel closed");
        });
    }
    for _ in 0..4 {
        assert_unblocked(&rx, "ref-lock starved behind a pending master-lock");
    }

    // Drain the generation: one unlock per holder, all from this thread.
    for _ in 0..5 {
        mutex.ref_unlock();
    }
    assert_unblocked(&pending_rx, "master-lock never granted after drain");
    pending.join().expect("master-lock thread panicked");
}

#[test]
fn lock_and_unlock_may_pair_across_threads() {
    let mutex = Arc::new(RefMutex::new());

    mutex.ref_lock();
    {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || mutex.ref_unlock())
            .join()
            .expect("unlock thread panicked");
    }

    // The generation is closed: the master lock is free again.
    mutex.master_lock();
    {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || mutex.master_unlock())
            .join()
            .expect("unlock thread panicked");
    }
    mutex.ref_lock();
    mutex.ref_unlock();
}

#[test]
fn master_lock_is_exclusive() {
    let mutex = RefMutex::new();
    let inside = AtomicU32::new(0);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..200 {
                    mutex.master_lock();
                    assert_eq!(
                        inside.fetch_add(1, Ordering::SeqCst),
                        0,
                        "two master-lock holders at once"
                    );
                    inside.fetch_sub(1, Ordering::SeqCst);
                    mutex.master_unlock();
                }
            });
        }
    });
}

#[test]
fn ref_locker_handle_maps_to_ref_class() {
    let mutex = Arc::new(RefMutex::new());
    let locker = mutex.ref_locker();

    locker.lock();
    locker.lock();
    assert_eq!(mutex.ref_holders(), 2);

    let (tx, rx) = mpsc::channel();
    let contender = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            mutex.master_lock();
            tx.send(()).expect("test channel closed");
            mutex.master_unlock();
        })
    };
    assert_blocked(&rx, "obtained master-lock while ref-locked via handle");

    locker.unlock();
    locker.unlock();
    assert_unblocked(&rx, "failed to obtain master-lock after handle unlocks");
    contender.join().expect("master-lock thread panicked");
}

#[test]
fn guards_exclude_master_until_dropped() {
    let mutex = Arc::new(RefMutex::new());

    let guard = mutex.ref_guard();

    let (tx, rx) = mpsc::channel();
    let contender = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            let _master = mutex.master_guard();
            tx.send(()).expect("test channel closed");
        })
    };
    assert_blocked(&rx, "obtained master-lock while a ref guard is live");

    drop(guard);
    assert_unblocked(&rx, "failed to obtain master-lock after guard drop");
    contender.join().expect("master-lock thread panicked");
}

#[test]
#[should_panic(expected = "ref-unlock of an unlocked RefMutex")]
fn over_unlock_is_fatal() {
    let mutex = RefMutex::new();
    mutex.ref_lock();
    mutex.ref_unlock();
    mutex.ref_unlock();
}
