// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Watchdog timers.

use super::nvm::BackendError;

/// A platform watchdog timer.
pub trait WatchdogBackend {
    /// Whether the watchdog is private to the calling partition, rather than owned by the service
    /// provider. Requests for a partition-local watchdog are never forwarded.
    const PARTITION_LOCAL: bool = false;

    /// Starts the watchdog, so that it resets the platform unless it is disabled in time.
    fn enable(&self) -> Result<(), BackendError>;

    /// Stops the watchdog.
    fn disable(&self) -> Result<(), BackendError>;
}

/// A watchdog which does nothing, for platforms without one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoWatchdog;

impl WatchdogBackend for NoWatchdog {
    const PARTITION_LOCAL: bool = true;

    fn enable(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn disable(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
