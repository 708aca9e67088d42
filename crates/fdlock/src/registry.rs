//! Descriptor to lock-record index.
//!
//! Records live in `partitions` independent ordered maps, each behind its
//! own guard; a descriptor always maps to the same partition. Every
//! structural change (insert, refcount zero-check, removal) for a
//! descriptor happens under that partition's guard, which makes
//! lookup-or-create and decrement-then-remove atomic per descriptor.
//!
//! Lock order: partition guard, then record mutex. Nothing here takes a
//! record mutex while holding a guard except shutdown's bounded drain,
//! which runs after the guard is released.

use crate::error::{violation, FdLockError, Result};
use crate::handle::FdLockRef;
use crate::record::{LockRecord, LockState};
use crate::RegistryConfig;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type Partition = BTreeMap<c_int, Arc<LockRecord>>;

/// A shareable handle to one descriptor lock registry.
///
/// Cloning is cheap; clones refer to the same set of records.
#[derive(Debug, Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    config: RegistryConfig,
    partitions: Box<[Mutex<Partition>]>,
    live: AtomicUsize,
    closed: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        let partitions = (0..config.partition_count())
            .map(|_| Mutex::new(Partition::new()))
            .collect();
        Self {
            shared: Arc::new(Shared {
                config,
                partitions,
                live: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Returns a counted handle on `fd`'s lock record, creating the record
    /// on first use.
    pub fn resolve(&self, fd: c_int) -> Result<FdLockRef> {
        let record = self.lookup_or_create(fd)?;
        Ok(FdLockRef::new(self.clone(), record))
    }

    fn partition(&self, fd: c_int) -> MutexGuard<'_, Partition> {
        let parts = &self.shared.partitions;
        parts[fd.unsigned_abs() as usize % parts.len()].lock()
    }

    pub(crate) fn lookup_or_create(&self, fd: c_int) -> Result<Arc<LockRecord>> {
        if fd < 0 {
            return Err(FdLockError::InvalidDescriptor(fd));
        }

        let mut part = self.partition(fd);
        if self.is_shut_down() {
            return Err(FdLockError::ShutDown);
        }

        if let Some(record) = part.get(&fd) {
            let refs = record.inc_ref();
            debug!("fd {}: reference acquired, refcount {}", fd, refs);
            return Ok(Arc::clone(record));
        }

        self.reserve_slot(fd)?;
        let record = Arc::new(LockRecord::new(fd));
        part.insert(fd, Arc::clone(&record));
        debug!("fd {}: lock record created", fd);
        Ok(record)
    }

    fn reserve_slot(&self, fd: c_int) -> Result<()> {
        let live = &self.shared.live;
        match self.shared.config.max_records {
            Some(limit) => live
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .map(drop)
                .map_err(|_| FdLockError::Exhausted { fd, limit }),
            None => {
                live.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    /// Drops one reference; on the last one the record leaves the registry.
    /// Returns the remaining count.
    pub(crate) fn release_record(&self, record: &Arc<LockRecord>) -> i32 {
        let fd = record.fd();
        let mut part = self.partition(fd);

        let prev = record.dec_ref();
        if prev <= 0 {
            drop(part);
            violation(format_args!("fd {}: release of unreferenced record", fd));
        }
        let refs = prev - 1;

        if refs == 0 {
            if record.is_drained() {
                debug!("fd {}: last reference to drained record released", fd);
            } else if self.remove_locked(&mut part, record) {
                debug!("fd {}: lock record destroyed", fd);
            } else {
                drop(part);
                violation(format_args!("fd {}: live record missing from registry", fd));
            }
        } else {
            debug!("fd {}: reference released, refcount {}", fd, refs);
        }
        refs
    }

    /// Erases `fd`'s entry regardless of its refcount. Returns whether an
    /// entry was present.
    pub(crate) fn remove(&self, fd: c_int) -> bool {
        let mut part = self.partition(fd);
        match part.get(&fd).cloned() {
            Some(record) => self.remove_locked(&mut part, &record),
            None => false,
        }
    }

    fn remove_locked(&self, part: &mut Partition, record: &Arc<LockRecord>) -> bool {
        match part.get(&record.fd()) {
            Some(found) if Arc::ptr_eq(found, record) => {
                part.remove(&record.fd());
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    /// Walks every registered record, one partition snapshot at a time.
    ///
    /// Each partition's guard is held only while it is copied, so the
    /// caller may lock records or call back into the registry while
    /// iterating. Records added behind the cursor are not visited.
    pub fn records(&self) -> Records<'_> {
        Records {
            registry: self,
            next_partition: 0,
            current: Vec::new().into_iter(),
        }
    }

    /// Tears the registry down: wakes every waiter, forces every record
    /// open and removes it whatever its refcount. Later `resolve` calls
    /// fail with [`FdLockError::ShutDown`]. Returns the number of records
    /// drained.
    pub fn shutdown_all(&self) -> usize {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            warn!("descriptor lock registry already shut down");
            return 0;
        }

        let mut drained = 0;
        for record in self.records() {
            let fd = record.fd();
            let refs = record.refcount();
            if record.drain() == LockState::Locked {
                warn!("fd {}: drained while locked", fd);
            }
            if refs > 0 {
                warn!("fd {}: drained with {} outstanding reference(s)", fd, refs);
            }
            if self.remove(fd) {
                drained += 1;
            }
        }
        info!("descriptor lock registry shut down, {} record(s) drained", drained);
        drained
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fd: c_int) -> bool {
        fd >= 0 && self.partition(fd).contains_key(&fd)
    }

    /// Current refcount of `fd`'s record, if one is registered.
    pub fn refcount_of(&self, fd: c_int) -> Option<i32> {
        if fd < 0 {
            return None;
        }
        self.partition(fd).get(&fd).map(|r| r.refcount())
    }
}

/// Iterator returned by [`Registry::records`].
pub struct Records<'a> {
    registry: &'a Registry,
    next_partition: usize,
    current: std::vec::IntoIter<Arc<LockRecord>>,
}

impl Iterator for Records<'_> {
    type Item = Arc<LockRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(record);
            }
            let parts = &self.registry.shared.partitions;
            if self.next_partition >= parts.len() {
                return None;
            }
            let snapshot: Vec<_> = parts[self.next_partition].lock().values().cloned().collect();
            self.next_partition += 1;
            self.current = snapshot.into_iter();
        }
    }
}
