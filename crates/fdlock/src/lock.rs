//! Exclusive per-descriptor critical section.
//!
//! `lock` masks signals before touching the record mutex and `unlock`
//! restores the mask only after the state has flipped back, then wakes
//! waiters. A woken thread therefore never sees `Unlocked` while the
//! previous holder could still take a handler under its old mask.

use crate::error::violation;
use crate::record::{LockRecord, LockState};
use crate::sigmask::SigMask;
use crate::RegistryConfig;
use log::trace;

/// Token returned by `lock`; it must be handed back to the matching `unlock`.
///
/// Holds the signal mask that was active before `lock`. A signal mask is a
/// property of the calling thread, so the token is neither `Send` nor `Sync`.
#[must_use = "a descriptor lock stays held until its token is passed to unlock"]
#[derive(Debug)]
pub struct SavedMask {
    mask: Option<SigMask>,
    issuer: *const LockRecord,
    epoch: u64,
}

impl SavedMask {
    /// The mask that `unlock` will reinstate, if signals were masked.
    pub fn mask(&self) -> Option<&SigMask> {
        self.mask.as_ref()
    }

    fn restore(&self) {
        if let Some(mask) = &self.mask {
            mask.restore();
        }
    }
}

enum Release {
    Unlocked,
    /// The hold was voided by shutdown; the record is left as it is.
    Voided,
    NotLocked,
    Stale,
}

pub(crate) fn lock(record: &LockRecord, config: &RegistryConfig) -> SavedMask {
    let mask = config
        .mask_signals
        .then(|| SigMask::block_all_except(config.reserved_signal));

    let mut state = record.lock_state();
    if *state == LockState::Locked {
        trace!("fd {}: busy, waiting for lock", record.fd());
        state = record.wait_unlocked(state);
    }
    *state = LockState::Locked;
    let epoch = record.advance_epoch();
    drop(state);

    trace!("fd {}: locked", record.fd());
    SavedMask {
        mask,
        issuer: record,
        epoch,
    }
}

pub(crate) fn unlock(record: &LockRecord, token: SavedMask) {
    if !std::ptr::eq(token.issuer, record) {
        token.restore();
        violation(format_args!(
            "fd {}: unlock with a token issued for another record",
            record.fd()
        ));
    }

    let outcome = {
        let mut state = record.lock_state();
        if record.epoch() != token.epoch {
            if record.is_drained() {
                Release::Voided
            } else {
                Release::Stale
            }
        } else if *state != LockState::Locked {
            Release::NotLocked
        } else {
            *state = LockState::Unlocked;
            Release::Unlocked
        }
    };

    token.restore();
    match outcome {
        Release::Unlocked => {
            record.broadcast();
            trace!("fd {}: unlocked", record.fd());
        }
        Release::Voided => trace!("fd {}: unlock of a hold voided by drain", record.fd()),
        Release::NotLocked => {
            violation(format_args!("fd {}: unlock while not locked", record.fd()))
        }
        Release::Stale => violation(format_args!(
            "fd {}: unlock with a token from an earlier hold",
            record.fd()
        )),
    }
}
