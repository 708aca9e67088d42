//! Connection locks for RPC transports that share a socket.
//!
//! Many client and server-transport handles can multiplex over one file
//! descriptor. This crate keeps one reference-counted [`LockRecord`] per
//! descriptor and lets exactly one of those handles drive I/O at a time:
//!
//! ```no_run
//! use fdlock::{Registry, RegistryConfig};
//!
//! let registry = Registry::new(RegistryConfig::default());
//! let conn = registry.resolve(7)?;
//! let token = conn.lock();
//! // ... send/receive on fd 7 ...
//! conn.unlock(token);
//! conn.release();
//! # Ok::<(), fdlock::FdLockError>(())
//! ```

pub mod config;
pub mod conn;
pub mod error;
pub mod handle;
pub mod lock;
pub mod record;
pub mod registry;
pub mod sigmask;
pub mod wait;

pub use config::RegistryConfig;
pub use conn::{ConnLock, ConnRole};
pub use error::{FdLockError, Result};
pub use handle::{FdLockGuard, FdLockRef};
pub use lock::SavedMask;
pub use record::{LockRecord, LockState};
pub use registry::{Records, Registry};
pub use sigmask::SigMask;
pub use wait::NotifyFlags;

use std::sync::OnceLock;

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, created with the default configuration on
/// first use.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::default)
}

/// Drains the process-wide registry. Meant to run once, at exit.
pub fn shutdown() -> usize {
    match GLOBAL.get() {
        Some(registry) => registry.shutdown_all(),
        None => 0,
    }
}
