use std::os::raw::c_int;

#[cfg(unix)]
const DEFAULT_RESERVED_SIGNAL: c_int = libc::SIGINT;
#[cfg(not(unix))]
const DEFAULT_RESERVED_SIGNAL: c_int = 2;

/// Tunables for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Number of independently guarded shards. Descriptors map to
    /// `fd % partitions`.
    pub partitions: usize,
    /// Block asynchronous signals while a descriptor lock is held.
    pub mask_signals: bool,
    /// Signal left deliverable inside the critical section (debugger interrupt).
    pub reserved_signal: c_int,
    /// Upper bound on live lock records, if any.
    pub max_records: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfig {
    pub const DEFAULT_PARTITIONS: usize = 7;

    pub const fn new() -> Self {
        Self {
            partitions: Self::DEFAULT_PARTITIONS,
            mask_signals: true,
            reserved_signal: DEFAULT_RESERVED_SIGNAL,
            max_records: None,
        }
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_signal_masking(mut self, enabled: bool) -> Self {
        self.mask_signals = enabled;
        self
    }

    pub fn with_reserved_signal(mut self, signal: c_int) -> Self {
        self.reserved_signal = signal;
        self
    }

    pub fn with_max_records(mut self, limit: usize) -> Self {
        self.max_records = Some(limit);
        self
    }

    /// Shard count actually used; zero is treated as one.
    pub(crate) fn partition_count(&self) -> usize {
        self.partitions.max(1)
    }
}
