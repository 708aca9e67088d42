use crate::lock::{self, SavedMask};
use crate::record::{LockRecord, LockState};
use crate::wait::{self, NotifyFlags};
use crate::Registry;
use std::fmt;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::Duration;

/// One counted reference to a descriptor's lock record.
///
/// Each successful [`Registry::resolve`] yields exactly one of these. It is
/// deliberately not `Clone`; resolve again to take another reference.
/// Dropping the handle releases its reference.
pub struct FdLockRef {
    registry: Registry,
    record: Option<Arc<LockRecord>>,
}

impl FdLockRef {
    pub(crate) fn new(registry: Registry, record: Arc<LockRecord>) -> Self {
        Self {
            registry,
            record: Some(record),
        }
    }

    fn record(&self) -> &LockRecord {
        match &self.record {
            Some(record) => record,
            None => unreachable!("record is only taken when the handle is consumed"),
        }
    }

    pub fn fd(&self) -> c_int {
        self.record().fd()
    }

    pub fn refcount(&self) -> i32 {
        self.record().refcount()
    }

    pub fn is_locked(&self) -> bool {
        self.record().state() == LockState::Locked
    }

    /// Whether shutdown has already force-removed this descriptor's record.
    pub fn is_drained(&self) -> bool {
        self.record().is_drained()
    }

    /// Enters the descriptor's critical section, blocking while another
    /// holder is inside it. Signals are masked until the matching
    /// [`unlock`](Self::unlock).
    pub fn lock(&self) -> SavedMask {
        lock::lock(self.record(), self.registry.config())
    }

    /// Leaves the critical section entered by the `lock` that issued `token`.
    ///
    /// # Panics
    ///
    /// If the record is not locked or `token` came from a different record
    /// or an earlier hold. A token whose hold was voided by shutdown only
    /// restores its mask and leaves the record alone.
    pub fn unlock(&self, token: SavedMask) {
        lock::unlock(self.record(), token)
    }

    /// Scoped form of [`lock`](Self::lock).
    pub fn guard(&self) -> FdLockGuard<'_> {
        FdLockGuard {
            handle: self,
            token: Some(self.lock()),
        }
    }

    /// Blocks until no thread holds the descriptor lock. Does not take it.
    pub fn wait(&self) {
        wait::wait_until_unlocked(self.record())
    }

    /// Bounded [`wait`](Self::wait); returns `false` if the lock was still
    /// held when `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        wait::wait_timeout(self.record(), timeout)
    }

    /// Wakes every thread blocked in `lock` or `wait` on this descriptor so
    /// they recheck the lock state.
    pub fn notify(&self, flags: NotifyFlags) {
        wait::notify(self.record(), flags)
    }

    /// Gives the reference back and returns how many remain. The record is
    /// destroyed when this was the last one.
    pub fn release(mut self) -> i32 {
        match self.record.take() {
            Some(record) => self.registry.release_record(&record),
            None => 0,
        }
    }
}

impl Drop for FdLockRef {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.registry.release_record(&record);
        }
    }
}

impl fmt::Debug for FdLockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record {
            Some(record) => f
                .debug_struct("FdLockRef")
                .field("fd", &record.fd())
                .field("refcount", &record.refcount())
                .field("state", &record.state())
                .finish(),
            None => f.write_str("FdLockRef(released)"),
        }
    }
}

/// Holds a descriptor lock until dropped. Not `Send`: it must be dropped on
/// the thread that took it, which owns the saved signal mask.
#[must_use = "the descriptor lock is released as soon as the guard is dropped"]
pub struct FdLockGuard<'a> {
    handle: &'a FdLockRef,
    token: Option<SavedMask>,
}

impl FdLockGuard<'_> {
    pub fn fd(&self) -> c_int {
        self.handle.fd()
    }
}

impl Drop for FdLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.handle.unlock(token);
        }
    }
}
