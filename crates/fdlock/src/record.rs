use parking_lot::{Condvar, Mutex, MutexGuard};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// Per-descriptor lock state shared by every handle on that descriptor.
///
/// `refcount` is only ever written under the owning registry partition's
/// guard, so the atomics here exist for lock-free diagnostic reads.
/// `epoch` is only written while `state` is locked; it advances on every
/// lock and on drain so a token can tell whether its hold is still current.
#[derive(Debug)]
pub struct LockRecord {
    fd: c_int,
    refcount: AtomicI32,
    drained: AtomicBool,
    epoch: AtomicU64,
    state: Mutex<LockState>,
    cv: Condvar,
}

impl LockRecord {
    pub(crate) fn new(fd: c_int) -> Self {
        Self {
            fd,
            refcount: AtomicI32::new(1),
            drained: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            state: Mutex::new(LockState::Unlocked),
            cv: Condvar::new(),
        }
    }

    pub fn fd(&self) -> c_int {
        self.fd
    }

    pub fn refcount(&self) -> i32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LockState {
        *self.state.lock()
    }

    /// Set once shutdown has force-removed this record from its registry.
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Caller must hold the partition guard.
    pub(crate) fn inc_ref(&self) -> i32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Caller must hold the partition guard. Returns the count before the
    /// decrement; a non-positive value means nothing was changed.
    pub(crate) fn dec_ref(&self) -> i32 {
        let prev = self.refcount.load(Ordering::Acquire);
        if prev > 0 {
            self.refcount.store(prev - 1, Ordering::Release);
        }
        prev
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Caller must hold the state mutex. Returns the new epoch.
    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock()
    }

    /// Blocks on the condition until `state` is `Unlocked`.
    pub(crate) fn wait_unlocked<'a>(
        &self,
        mut state: MutexGuard<'a, LockState>,
    ) -> MutexGuard<'a, LockState> {
        while *state != LockState::Unlocked {
            self.cv.wait(&mut state);
        }
        state
    }

    /// Like [`wait_unlocked`](Self::wait_unlocked) but gives up after
    /// `timeout`. The returned flag is whether `Unlocked` was observed.
    pub(crate) fn wait_unlocked_for<'a>(
        &self,
        mut state: MutexGuard<'a, LockState>,
        timeout: Duration,
    ) -> (MutexGuard<'a, LockState>, bool) {
        let deadline = std::time::Instant::now() + timeout;
        while *state != LockState::Unlocked {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                let unlocked = *state == LockState::Unlocked;
                return (state, unlocked);
            }
        }
        (state, true)
    }

    pub(crate) fn broadcast(&self) -> usize {
        self.cv.notify_all()
    }

    /// Forces the record back to `Unlocked` and wakes every waiter. Used
    /// only by shutdown; returns the state it found.
    pub(crate) fn drain(&self) -> LockState {
        self.drained.store(true, Ordering::Release);
        let prev = {
            let mut state = self.state.lock();
            self.advance_epoch();
            std::mem::replace(&mut *state, LockState::Unlocked)
        };
        self.cv.notify_all();
        prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unlocked_with_one_reference() {
        let rec = LockRecord::new(4);
        assert_eq!(rec.fd(), 4);
        assert_eq!(rec.refcount(), 1);
        assert_eq!(rec.state(), LockState::Unlocked);
        assert!(!rec.is_drained());
    }

    #[test]
    fn dec_ref_never_goes_negative() {
        let rec = LockRecord::new(4);
        assert_eq!(rec.dec_ref(), 1);
        assert_eq!(rec.dec_ref(), 0);
        assert_eq!(rec.refcount(), 0);
    }

    #[test]
    fn timed_wait_reports_locked() {
        let rec = LockRecord::new(4);
        *rec.lock_state() = LockState::Locked;
        let (_state, unlocked) =
            rec.wait_unlocked_for(rec.lock_state(), Duration::from_millis(10));
        assert!(!unlocked);
    }

    #[test]
    fn drain_unlocks_and_marks() {
        let rec = LockRecord::new(4);
        *rec.lock_state() = LockState::Locked;
        let before = rec.epoch();
        assert_eq!(rec.drain(), LockState::Locked);
        assert_eq!(rec.state(), LockState::Unlocked);
        assert!(rec.is_drained());
        assert_eq!(rec.epoch(), before + 1);
    }
}
