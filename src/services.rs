// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! NVM and watchdog services.
//!
//! Only the service provider partition drives the real NVM and watchdog. Every other partition
//! forwards its requests to the provider as direct messages, unless the backend it was built with
//! is private to the partition.

pub mod nvm;
pub mod watchdog;

use crate::{
    VAL_ERROR, VAL_SUCCESS,
    rpc::{LogicalId, Rpc, RpcError, expect_direct_response},
    status::TestState,
};
use arm_ffa::Interface;
use log::{debug, error, info};
use nvm::{BackendError, NVM_RECORD_SIZE, NvmBackend, NvmIndex, in_bounds};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use watchdog::WatchdogBackend;

/// The NVM backend to use when the platform doesn't provide one.
#[cfg(feature = "transient_services")]
pub type DefaultNvm = nvm::TransientNvm;
/// The watchdog backend to use when the platform doesn't provide one.
#[cfg(feature = "transient_services")]
pub type DefaultWatchdog = watchdog::NoWatchdog;

/// The maximum number of times to resume the provider after an interrupt while waiting for it to
/// disable the watchdog.
pub const MAX_INTERRUPT_DRAIN: usize = 32;

/// Set in the first argument word of every service request, and never in a test descriptor.
pub const SERVICE_OPCODE_FLAG: u32 = 1 << 31;

/// A request to the service provider, sent in the first argument word of a direct message.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ServiceOpcode {
    /// Reads a record. Arguments are `[offset, size, 0, 0]`, and the response carries the data.
    NvmRead = 0x8000_0001,
    /// Writes a record. Arguments are `[offset, size, data, 0]`.
    NvmWrite = 0x8000_0002,
    /// Starts the watchdog.
    WatchdogEnable = 0x8000_0003,
    /// Stops the watchdog.
    WatchdogDisable = 0x8000_0004,
}

/// Returns whether the given first argument word of a request is a service opcode rather than a
/// test descriptor.
pub fn is_service_request(word: u32) -> bool {
    word & SERVICE_OPCODE_FLAG != 0
}

/// An error carrying out a service request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The access didn't fit in the NVM, or in the caller's buffer. Nothing was sent or accessed.
    #[error("NVM access of {size} bytes at offset {offset:#x} is out of bounds")]
    OutOfBounds {
        /// The byte offset requested.
        offset: u32,
        /// The number of bytes requested.
        size: usize,
    },
    /// The request couldn't be forwarded to the service provider.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The service provider answered with `VAL_ERROR`.
    #[error("Service provider reported failure")]
    Provider,
    /// The local backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The service provider kept being interrupted.
    #[error("Still interrupted after resuming {0} times")]
    InterruptStorm(usize),
}

/// Something which can carry out service requests forwarded by other partitions.
pub trait ServiceHandler {
    /// Performs the given request and returns the argument words of the response.
    ///
    /// The first word is the data read, if any, and the second is `VAL_SUCCESS` or `VAL_ERROR`.
    fn handle_request(&self, opcode: ServiceOpcode, args: [u32; 4]) -> [u32; 5];
}

/// Routes NVM and watchdog requests either to the local backends or to the service provider.
pub struct ServiceRouter<'a, N: NvmBackend, W: WatchdogBackend> {
    rpc: Rpc<'a>,
    nvm: &'a N,
    watchdog: &'a W,
}

impl<'a, N: NvmBackend, W: WatchdogBackend> ServiceRouter<'a, N, W> {
    /// Creates a router for the endpoint `rpc` calls on behalf of, over the given backends.
    ///
    /// The backends are only used directly by the service provider, or if they are
    /// partition-local.
    pub fn new(rpc: Rpc<'a>, nvm: &'a N, watchdog: &'a W) -> Self {
        Self { rpc, nvm, watchdog }
    }

    fn is_provider(&self) -> bool {
        self.rpc.directory().own_logical_id() == LogicalId::SERVICE_PROVIDER
    }

    /// Reads `size` bytes from NVM at `offset` into the start of `buffer`.
    pub fn nvm_read(
        &self,
        offset: u32,
        buffer: &mut [u8],
        size: usize,
    ) -> Result<(), ServiceError> {
        check_access::<N>(offset, buffer.len(), size)?;
        let record = &mut buffer[..size];

        if N::PARTITION_LOCAL || self.is_provider() {
            self.nvm.read(offset as usize, record)?;
            return Ok(());
        }

        let [data, status, ..] = self.rpc.call(
            LogicalId::SERVICE_PROVIDER,
            ServiceOpcode::NvmRead.into(),
            [offset, size as u32, 0, 0],
        )?;
        check_provider_status(status)?;
        record.copy_from_slice(&data.to_le_bytes());
        Ok(())
    }

    /// Writes the first `size` bytes of `buffer` to NVM at `offset`.
    pub fn nvm_write(&self, offset: u32, buffer: &[u8], size: usize) -> Result<(), ServiceError> {
        check_access::<N>(offset, buffer.len(), size)?;
        let record = &buffer[..size];

        if N::PARTITION_LOCAL || self.is_provider() {
            self.nvm.write(offset as usize, record)?;
            return Ok(());
        }

        let data = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let [_, status, ..] = self.rpc.call(
            LogicalId::SERVICE_PROVIDER,
            ServiceOpcode::NvmWrite.into(),
            [offset, size as u32, data, 0],
        )?;
        check_provider_status(status)
    }

    /// Enables the watchdog.
    pub fn watchdog_enable(&self) -> Result<(), ServiceError> {
        if W::PARTITION_LOCAL || self.is_provider() {
            self.watchdog.enable()?;
            return Ok(());
        }

        let [_, status, ..] = self.rpc.call(
            LogicalId::SERVICE_PROVIDER,
            ServiceOpcode::WatchdogEnable.into(),
            [0; 4],
        )?;
        check_provider_status(status)
    }

    /// Disables the watchdog.
    ///
    /// The provider may be interrupted while handling the request, in which case it is resumed
    /// until it responds, up to `MAX_INTERRUPT_DRAIN` times.
    pub fn watchdog_disable(&self) -> Result<(), ServiceError> {
        if W::PARTITION_LOCAL || self.is_provider() {
            self.watchdog.disable()?;
            return Ok(());
        }

        let mut response = self.rpc.send_request(
            self.rpc.routing_to(LogicalId::SERVICE_PROVIDER)?,
            [ServiceOpcode::WatchdogDisable.into(), 0, 0, 0, 0],
        )?;
        let mut resumed = 0;
        while let Interface::Interrupt { target_info, .. } = response {
            if resumed == MAX_INTERRUPT_DRAIN {
                error!("Watchdog disable still interrupted after {resumed} resumes");
                return Err(ServiceError::InterruptStorm(resumed));
            }
            resumed += 1;
            debug!("Interrupted while disabling watchdog, resuming {target_info:?}");
            response = self.rpc.resume(target_info)?;
        }
        let [_, status, ..] = expect_direct_response(response)?;
        check_provider_status(status)
    }

    /// Reads one of the framework's NVM records.
    pub fn read_record(&self, index: NvmIndex) -> Result<u32, ServiceError> {
        let mut buffer = [0; NVM_RECORD_SIZE];
        self.nvm_read(index.offset(), &mut buffer, NVM_RECORD_SIZE)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Writes one of the framework's NVM records.
    pub fn write_record(&self, index: NvmIndex, value: u32) -> Result<(), ServiceError> {
        self.nvm_write(index.offset(), &value.to_le_bytes(), NVM_RECORD_SIZE)
    }

    /// Records in NVM that the running test is about to reset the platform on purpose.
    pub fn set_reboot_flag(&self) {
        info!("Setting reboot flag");
        if let Err(e) = self.write_record(NvmIndex::TestProgress, TestState::Rebooting.into()) {
            panic!("Failed to set reboot flag: {e}");
        }
    }

    /// Clears the reboot flag once the platform has come back up.
    pub fn reset_reboot_flag(&self) {
        info!("Resetting reboot flag");
        if let Err(e) = self.write_record(NvmIndex::TestProgress, TestState::Fail.into()) {
            panic!("Failed to reset reboot flag: {e}");
        }
    }

    /// Returns whether the platform was reset on purpose by the running test.
    pub fn is_rebooting(&self) -> Result<bool, ServiceError> {
        Ok(self.read_record(NvmIndex::TestProgress)? == u32::from(TestState::Rebooting))
    }

    /// Restarts the watchdog timeout.
    pub fn reprogram_watchdog(&self) {
        if let Err(e) = self
            .watchdog_disable()
            .and_then(|()| self.watchdog_enable())
        {
            panic!("Failed to reprogram watchdog: {e}");
        }
    }
}

impl<N: NvmBackend, W: WatchdogBackend> ServiceHandler for ServiceRouter<'_, N, W> {
    fn handle_request(&self, opcode: ServiceOpcode, args: [u32; 4]) -> [u32; 5] {
        if !self.is_provider() {
            error!("Got {opcode:?} request but this isn't the service provider");
            return [0, VAL_ERROR, 0, 0, 0];
        }

        let [offset, size, data, _] = args;
        let result = match opcode {
            ServiceOpcode::NvmRead => {
                let mut buffer = [0; NVM_RECORD_SIZE];
                self.nvm_read(offset, &mut buffer, size as usize)
                    .map(|()| u32::from_le_bytes(buffer))
            }
            ServiceOpcode::NvmWrite => self
                .nvm_write(offset, &data.to_le_bytes(), size as usize)
                .map(|()| 0),
            ServiceOpcode::WatchdogEnable => self.watchdog_enable().map(|()| 0),
            ServiceOpcode::WatchdogDisable => self.watchdog_disable().map(|()| 0),
        };
        match result {
            Ok(data) => [data, VAL_SUCCESS, 0, 0, 0],
            Err(e) => {
                error!("{opcode:?} request failed: {e}");
                [0, VAL_ERROR, 0, 0, 0]
            }
        }
    }
}

fn check_access<N: NvmBackend>(
    offset: u32,
    buffer_len: usize,
    size: usize,
) -> Result<(), ServiceError> {
    if in_bounds(offset, size, N::CAPACITY) && buffer_len >= size {
        Ok(())
    } else {
        error!("NVM access of {size} bytes at {offset:#x} out of bounds");
        Err(ServiceError::OutOfBounds { offset, size })
    }
}

fn check_provider_status(status: u32) -> Result<(), ServiceError> {
    if status == VAL_SUCCESS {
        Ok(())
    } else {
        error!("Service provider returned status {status:#x}");
        Err(ServiceError::Provider)
    }
}
