// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Non-volatile record storage.

use spin::mutex::SpinMutex;
use thiserror::Error;

/// The size in bytes of every NVM access.
pub const NVM_RECORD_SIZE: usize = 4;

/// The size of the in-memory NVM used when there is no platform driver.
pub const TRANSIENT_NVM_SIZE: usize = 1024;

/// A platform NVM or watchdog driver failed.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("Platform backend failed")]
pub struct BackendError;

/// A flat byte-addressed non-volatile store.
///
/// Callers have already checked that every access is within `CAPACITY`.
pub trait NvmBackend {
    /// The size of the store in bytes.
    const CAPACITY: usize;

    /// Whether the store is private to the calling partition, rather than owned by the service
    /// provider. Accesses to a partition-local store are never forwarded.
    const PARTITION_LOCAL: bool = false;

    /// Fills `buffer` from the store, starting at `offset`.
    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), BackendError>;

    /// Copies `buffer` into the store, starting at `offset`.
    fn write(&self, offset: usize, buffer: &[u8]) -> Result<(), BackendError>;
}

/// An NVM held in memory, which doesn't survive a reset.
pub struct TransientNvm<const N: usize = TRANSIENT_NVM_SIZE> {
    store: SpinMutex<[u8; N]>,
}

impl<const N: usize> TransientNvm<N> {
    /// Creates a new store filled with zeroes.
    pub const fn new() -> Self {
        Self {
            store: SpinMutex::new([0; N]),
        }
    }
}

impl<const N: usize> Default for TransientNvm<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvmBackend for TransientNvm<N> {
    const CAPACITY: usize = N;
    const PARTITION_LOCAL: bool = true;

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), BackendError> {
        let store = self.store.lock();
        let record = store.get(offset..offset + buffer.len()).ok_or(BackendError)?;
        buffer.copy_from_slice(record);
        Ok(())
    }

    fn write(&self, offset: usize, buffer: &[u8]) -> Result<(), BackendError> {
        let mut store = self.store.lock();
        let record = store
            .get_mut(offset..offset + buffer.len())
            .ok_or(BackendError)?;
        record.copy_from_slice(buffer);
        Ok(())
    }
}

/// The records the framework keeps in NVM, each `NVM_RECORD_SIZE` bytes long.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum NvmIndex {
    /// The suite being run.
    CurrentSuite = 0,
    /// The test being run.
    CurrentTest = 1,
    /// The last test to run.
    EndTest = 2,
    /// Whether a test has reset the platform on purpose.
    TestProgress = 3,
}

impl NvmIndex {
    /// Returns the byte offset of the record.
    pub const fn offset(self) -> u32 {
        self as u32 * NVM_RECORD_SIZE as u32
    }
}

/// Returns whether an access of `size` bytes at `offset` is valid for a store of `capacity`
/// bytes.
pub fn in_bounds(offset: u32, size: usize, capacity: usize) -> bool {
    let offset = offset as usize;
    size == NVM_RECORD_SIZE
        && offset <= capacity
        && offset.checked_add(size).is_some_and(|end| end <= capacity)
}
