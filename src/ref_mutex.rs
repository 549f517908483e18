//! RefMutex - a mutual exclusion lock with two lock classes.
//!
//! The master lock takes an exclusive lock on the whole mutex, whereas the
//! ref class allows any number of holders to coexist even while a master lock
//! has been requested.
//!
//! ## Problem
//!
//! A host that keeps a foreign engine's objects alive often has many threads
//! taking short cooperative locks on a shared resource, plus a rare exclusive
//! operation (teardown, snapshotting) that must see no cooperative holder at
//! all. A plain reader/writer lock is close but wrong: a pending writer stalls
//! new readers, and here a new cooperative holder must never starve behind a
//! pending exclusive request once its group is already inside.
//!
//! ## Solution
//!
//! The first ref-lock in a generation acquires the master lock on behalf of
//! the whole group; later ref-locks only bump a counter guarded by a small
//! secondary mutex. The last ref-unlock releases the master lock. A pending
//! master-lock request therefore waits for the group to fully drain, while
//! ref-locks taken inside an existing generation return immediately.
//!
//! Lock and unlock do not need to pair on the same thread: the primitive is a
//! counting gate, not a reentrant per-thread lock. The raw
//! [`ref_lock`](RefMutex::ref_lock)/[`ref_unlock`](RefMutex::ref_unlock) calls
//! are the primitive; [`ref_guard`](RefMutex::ref_guard) and
//! [`master_guard`](RefMutex::master_guard) are RAII sugar for same-thread
//! scopes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};

/// A hybrid mutex with an exclusive "master" lock class and a cooperative
/// "ref" lock class.
///
/// Any number of ref-lock holders may coexist, but a master-lock holder
/// excludes all ref-lock holders and vice versa, and only one master-lock
/// holder may exist at a time.
///
/// # Example
///
/// ```ignore
/// static ENGINE_LOCK: RefMutex = RefMutex::new();
///
/// // Many threads, short cooperative sections:
/// ENGINE_LOCK.with_ref_lock(|| touch_engine_object());
///
/// // One thread, exclusive teardown:
/// let _master = ENGINE_LOCK.master_guard();
/// dispose_engine();
/// ```
pub struct RefMutex {
    /// The exclusive lock both classes contend on. Raw so that acquisition by
    /// one thread can be released by another (last ref-unlock of a
    /// generation, or an explicit cross-thread master-unlock).
    master: RawMutex,

    /// Number of active ref-lock holders, behind its own short-lived lock.
    /// This is deliberately not the master lock itself: the 0→1 transition
    /// acquires the master lock while holding this one, so concurrent
    /// ref-lock callers queue here rather than on the master lock.
    ref_count: Mutex<u64>,

    /// Whether a direct `master_lock` call currently holds the master lock.
    /// Only used to detect master-unlock misuse; the ref-lock path never
    /// touches it.
    master_held: AtomicBool,
}

impl RefMutex {
    /// Create a new unlocked mutex. `const`, so a `RefMutex` can back a
    /// `static`.
    pub const fn new() -> Self {
        Self {
            master: RawMutex::INIT,
            ref_count: Mutex::new(0),
            master_held: AtomicBool::new(false),
        }
    }

    /// Acquire the exclusive master lock.
    ///
    /// Blocks while any ref-lock is outstanding or another master lock is
    /// held. Release with [`master_unlock`](Self::master_unlock), from any
    /// thread.
    pub fn master_lock(&self) {
        self.master.lock();
        self.master_held.store(true, Ordering::Release);
        log::trace!("master lock acquired");
    }

    /// Release the master lock.
    ///
    /// # Panics
    ///
    /// Panics if no [`master_lock`](Self::master_lock) is outstanding.
    /// Silently releasing a lock the caller does not hold would corrupt the
    /// mutual-exclusion state shared with the ref class.
    pub fn master_unlock(&self) {
        if !self.master_held.swap(false, Ordering::AcqRel) {
            panic!("master-unlock of an unlocked RefMutex");
        }
        // SAFETY: the swap above proves a master_lock acquisition is
        // outstanding and claims responsibility for releasing it.
        unsafe { self.master.unlock() };
        log::trace!("master lock released");
    }

    /// Acquire a ref lock.
    ///
    /// The first ref-lock of a generation (count 0→1) takes the master lock
    /// on behalf of all ref holders and blocks while a master lock is held.
    /// Further ref-locks only increment the counter and return immediately.
    pub fn ref_lock(&self) {
        let mut count = self.ref_count.lock();
        if *count == 0 {
            self.master.lock();
            log::trace!("ref-lock generation opened");
        }
        *count += 1;
    }

    /// Release a ref lock.
    ///
    /// The last ref-unlock of a generation (count 1→0) releases the master
    /// lock held by the group. May be called from a different thread than the
    /// matching [`ref_lock`](Self::ref_lock).
    ///
    /// # Panics
    ///
    /// Panics if no ref-lock is outstanding. Proceeding would wrap the
    /// counter and leave the master lock in an undefined state.
    pub fn ref_unlock(&self) {
        let mut count = self.ref_count.lock();
        if *count == 0 {
            panic!("ref-unlock of an unlocked RefMutex");
        }
        *count -= 1;
        if *count == 0 {
            // SAFETY: this generation's first ref_lock acquired the master
            // lock and the counter proves it has not been released since.
            unsafe { self.master.unlock() };
            log::trace!("ref-lock generation drained");
        }
    }

    /// Number of active ref-lock holders.
    ///
    /// Inherently racy; intended for diagnostics only.
    pub fn ref_holders(&self) -> u64 {
        *self.ref_count.lock()
    }

    /// A copyable handle whose `lock`/`unlock` map to the ref class.
    ///
    /// Use wherever an opaque acquire/release interface is expected while
    /// retaining cooperative semantics underneath.
    pub fn ref_locker(&self) -> RefLocker<'_> {
        RefLocker { mutex: self }
    }

    /// Acquire a ref lock released on drop.
    pub fn ref_guard(&self) -> RefLockGuard<'_> {
        self.ref_lock();
        RefLockGuard { mutex: self }
    }

    /// Acquire the master lock released on drop.
    pub fn master_guard(&self) -> MasterGuard<'_> {
        self.master_lock();
        MasterGuard { mutex: self }
    }

    /// Run `f` under a ref lock.
    pub fn with_ref_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.ref_guard();
        f()
    }
}

impl Default for RefMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RefMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefMutex")
            .field("ref_holders", &self.ref_holders())
            .finish_non_exhaustive()
    }
}

/// Reusable handle mapping a generic lock/unlock interface onto the ref
/// class of a [`RefMutex`].
#[derive(Clone, Copy)]
pub struct RefLocker<'a> {
    mutex: &'a RefMutex,
}

impl RefLocker<'_> {
    /// Equivalent to [`RefMutex::ref_lock`].
    pub fn lock(&self) {
        self.mutex.ref_lock();
    }

    /// Equivalent to [`RefMutex::ref_unlock`].
    pub fn unlock(&self) {
        self.mutex.ref_unlock();
    }
}

impl fmt::Debug for RefLocker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefLocker").finish_non_exhaustive()
    }
}

/// RAII guard for a ref lock; releases on drop.
#[must_use = "the ref lock is released when the guard is dropped"]
pub struct RefLockGuard<'a> {
    mutex: &'a RefMutex,
}

impl Drop for RefLockGuard<'_> {
    fn drop(&mut self) {
        self.mutex.ref_unlock();
    }
}

/// RAII guard for the master lock; releases on drop.
#[must_use = "the master lock is released when the guard is dropped"]
pub struct MasterGuard<'a> {
    mutex: &'a RefMutex,
}

impl Drop for MasterGuard<'_> {
    fn drop(&mut self) {
        self.mutex.master_unlock();
    }
}
