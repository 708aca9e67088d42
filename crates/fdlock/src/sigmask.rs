//! Per-thread signal mask save/restore.
//!
//! While a descriptor lock is held the calling thread blocks every signal
//! except one reserved for debugger interrupts, so a handler can never
//! re-enter RPC code and deadlock on the same record. On targets without
//! POSIX signal masks these operations are no-ops.

use std::fmt;
use std::os::raw::c_int;

/// Highest signal number probed when comparing or printing masks.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn max_signal() -> c_int {
    libc::SIGRTMAX()
}

/// Every bit a `sigset_t` can hold; `sigismember` rejects numbers the
/// platform does not define.
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn max_signal() -> c_int {
    (8 * std::mem::size_of::<libc::sigset_t>()) as c_int
}

/// A snapshot of one thread's blocked-signal set.
#[derive(Clone, Copy)]
pub struct SigMask {
    #[cfg(unix)]
    set: libc::sigset_t,
}

#[cfg(unix)]
impl SigMask {
    /// The calling thread's current mask.
    pub fn current() -> Self {
        let mut old = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: a null `set` only queries; `old` is fully written on success.
        let rc =
            unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), old.as_mut_ptr()) };
        check("query", rc);
        // SAFETY: initialised by pthread_sigmask above.
        Self {
            set: unsafe { old.assume_init() },
        }
    }

    /// Whether `signal` is blocked in this mask.
    pub fn contains(&self, signal: c_int) -> bool {
        // SAFETY: `self.set` is an initialised sigset_t.
        unsafe { libc::sigismember(&self.set, signal) == 1 }
    }

    /// Blocks everything but `reserved` on the calling thread and returns
    /// the mask that was in effect before.
    pub(crate) fn block_all_except(reserved: c_int) -> Self {
        let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
        let mut old = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: sigfillset initialises `set` before any other use; `old`
        // is written by pthread_sigmask before assume_init.
        unsafe {
            libc::sigfillset(set.as_mut_ptr());
            libc::sigdelset(set.as_mut_ptr(), reserved);
            let rc = libc::pthread_sigmask(libc::SIG_SETMASK, set.as_ptr(), old.as_mut_ptr());
            check("block", rc);
            Self {
                set: old.assume_init(),
            }
        }
    }

    /// Makes this mask the calling thread's mask again.
    pub(crate) fn restore(&self) {
        // SAFETY: `self.set` is an initialised sigset_t.
        let rc =
            unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &self.set, std::ptr::null_mut()) };
        check("restore", rc);
    }

    fn blocked(&self) -> impl Iterator<Item = c_int> + '_ {
        (1..=max_signal()).filter(move |&sig| self.contains(sig))
    }
}

#[cfg(unix)]
fn check(op: &str, rc: c_int) {
    if rc != 0 {
        crate::error::violation(format_args!("pthread_sigmask {} failed: errno {}", op, rc));
    }
}

#[cfg(not(unix))]
impl SigMask {
    pub fn current() -> Self {
        Self {}
    }

    pub fn contains(&self, _signal: c_int) -> bool {
        false
    }

    pub(crate) fn block_all_except(_reserved: c_int) -> Self {
        Self {}
    }

    pub(crate) fn restore(&self) {}

    fn blocked(&self) -> impl Iterator<Item = c_int> + '_ {
        std::iter::empty()
    }
}

impl PartialEq for SigMask {
    fn eq(&self, other: &Self) -> bool {
        self.blocked().eq(other.blocked())
    }
}

impl Eq for SigMask {}

impl fmt::Debug for SigMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.blocked()).finish()
    }
}
