use std::fmt;
use std::os::raw::c_int;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FdLockError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(c_int),

    #[error("cannot create lock record for fd {fd}: {limit} records already live")]
    Exhausted { fd: c_int, limit: usize },

    #[error("descriptor lock registry has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, FdLockError>;

/// Reports a broken locking contract and aborts the calling operation.
///
/// Continuing after one of these risks two threads driving the same
/// descriptor, so they are never surfaced as `Err`.
#[cold]
#[track_caller]
pub(crate) fn violation(args: fmt::Arguments<'_>) -> ! {
    log::error!("fdlock invariant violated: {}", args);
    panic!("fdlock invariant violated: {}", args);
}
