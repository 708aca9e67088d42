//! Lock slot embedded in RPC client and server-transport objects.
//!
//! Several clients and transports may sit on one socket. Each owns a
//! `ConnLock`, initialises it once while the connection is being built and
//! releases it when the connection is torn down; all of them then share
//! the descriptor's single lock record.

use crate::error::{violation, Result};
use crate::handle::FdLockRef;
use crate::lock::SavedMask;
use crate::wait::NotifyFlags;
use crate::Registry;
use log::debug;
use std::os::raw::c_int;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnRole {
    Client,
    Transport,
}

#[derive(Debug)]
pub struct ConnLock {
    fd: c_int,
    role: ConnRole,
    slot: Option<FdLockRef>,
}

impl ConnLock {
    pub fn new(fd: c_int, role: ConnRole) -> Self {
        Self {
            fd,
            role,
            slot: None,
        }
    }

    pub fn fd(&self) -> c_int {
        self.fd
    }

    pub fn role(&self) -> ConnRole {
        self.role
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_some()
    }

    /// Takes this connection's reference on its descriptor record. Calling
    /// it again on an initialised slot does nothing.
    pub fn ensure_initialized(&mut self, registry: &Registry) -> Result<()> {
        if self.slot.is_none() {
            let handle = registry.resolve(self.fd)?;
            debug!(
                "{:?} on fd {}: lock slot initialised, refcount {}",
                self.role,
                self.fd,
                handle.refcount()
            );
            self.slot = Some(handle);
        }
        Ok(())
    }

    #[track_caller]
    fn handle(&self) -> &FdLockRef {
        match &self.slot {
            Some(handle) => handle,
            None => violation(format_args!(
                "{:?} on fd {}: lock slot used before initialisation",
                self.role, self.fd
            )),
        }
    }

    pub fn lock(&self) -> SavedMask {
        self.handle().lock()
    }

    pub fn unlock(&self, token: SavedMask) {
        self.handle().unlock(token)
    }

    pub fn wait(&self) {
        self.handle().wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.handle().wait_timeout(timeout)
    }

    pub fn notify(&self, flags: NotifyFlags) {
        self.handle().notify(flags)
    }

    /// Drops this connection's reference and clears the slot. Returns the
    /// references left on the record, or `None` if the slot was empty.
    pub fn release(&mut self) -> Option<i32> {
        self.slot.take().map(FdLockRef::release)
    }
}
