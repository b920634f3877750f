//! The lock shared by a pad's session and its siblings.
//!
//! The lock is not reentrant. Acquiring it again on the thread that already
//! holds it would deadlock, so that case panics instead.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const NO_OWNER: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

struct LockInner {
    mutex: Mutex<()>,
    owner: AtomicU64,
}

/// Cloneable handle to one shared lock.
#[derive(Clone)]
pub struct DeviceLock {
    inner: Arc<LockInner>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                mutex: Mutex::new(()),
                owner: AtomicU64::new(NO_OWNER),
            }),
        }
    }

    /// Acquire the lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this lock.
    pub fn lock(&self) -> DeviceLockGuard<'_> {
        if self.is_locked_by_current_thread() {
            panic!("device lock acquired recursively by the thread that already holds it");
        }

        let guard = self.inner.mutex.lock();
        self.inner.owner.store(current_thread_token(), Ordering::Release);
        DeviceLockGuard {
            lock: self,
            _guard: guard,
        }
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        self.inner.owner.load(Ordering::Acquire) == current_thread_token()
    }

    pub fn same_lock(&self, other: &DeviceLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLock")
            .field("held_by_current_thread", &self.is_locked_by_current_thread())
            .finish()
    }
}

/// Proof that the shared lock is held. Releases it on drop.
pub struct DeviceLockGuard<'a> {
    lock: &'a DeviceLock,
    _guard: MutexGuard<'a, ()>,
}

impl DeviceLockGuard<'_> {
    pub fn belongs_to(&self, lock: &DeviceLock) -> bool {
        self.lock.same_lock(lock)
    }
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` is dropped, so the owner is cleared while the
        // mutex is still held.
        self.lock.inner.owner.store(NO_OWNER, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn guard_tracks_ownership() {
        let lock = DeviceLock::new();
        assert!(!lock.is_locked_by_current_thread());
        {
            let guard = lock.lock();
            assert!(lock.is_locked_by_current_thread());
            assert!(guard.belongs_to(&lock));
            assert!(!guard.belongs_to(&DeviceLock::new()));
        }
        assert!(!lock.is_locked_by_current_thread());
    }

    #[test]
    fn ownership_is_per_thread() {
        let lock = DeviceLock::new();
        let _guard = lock.lock();

        let other = lock.clone();
        let seen_from_other_thread = thread::spawn(move || other.is_locked_by_current_thread())
            .join()
            .unwrap();
        assert!(!seen_from_other_thread);
    }

    #[test]
    #[should_panic(expected = "recursively")]
    fn recursive_acquisition_panics() {
        let lock = DeviceLock::new();
        let _outer = lock.lock();
        let _inner = lock.lock();
    }

    #[test]
    fn clones_share_the_lock() {
        let lock = DeviceLock::new();
        let clone = lock.clone();
        assert!(lock.same_lock(&clone));

        let _guard = clone.lock();
        assert!(lock.is_locked_by_current_thread());
    }
}
