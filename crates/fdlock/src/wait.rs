//! Waiting for a descriptor to go quiescent, and waking such waiters.
//!
//! Neither operation changes the lock state.

use crate::record::LockRecord;
use bitflags::bitflags;
use log::trace;
use std::time::Duration;

bitflags! {
    /// How `notify` touches the record mutex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifyFlags: u32 {
        /// Take the record mutex around the wakeup.
        const LOCK = 0x0002;
    }
}

pub(crate) fn wait_until_unlocked(record: &LockRecord) {
    let state = record.lock_state();
    trace!("fd {}: waiting for unlock", record.fd());
    drop(record.wait_unlocked(state));
}

pub(crate) fn wait_timeout(record: &LockRecord, timeout: Duration) -> bool {
    let (_state, unlocked) = record.wait_unlocked_for(record.lock_state(), timeout);
    if !unlocked {
        trace!("fd {}: still locked after {:?}", record.fd(), timeout);
    }
    unlocked
}

pub(crate) fn notify(record: &LockRecord, flags: NotifyFlags) {
    let woken = if flags.contains(NotifyFlags::LOCK) {
        let _state = record.lock_state();
        record.broadcast()
    } else {
        record.broadcast()
    };
    trace!("fd {}: notify woke {} waiter(s)", record.fd(), woken);
}
