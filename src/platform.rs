// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Hooks into the platform a partition runs on.


use core::mem::size_of_val;

/// The hooks the framework needs from the platform it runs on.
///
/// Peer cores share memory with this one, but the framework doesn't rely on hardware coherence
/// between them. Every read of state written by another core must be preceded by
/// [`invalidate_dcache_range`](Platform::invalidate_dcache_range), and every write which another
/// core will read must be followed by [`clean_dcache_range`](Platform::clean_dcache_range). On a
/// coherent platform both may be no-ops.
pub trait Platform {
    /// The number of CPU cores.
    const CORE_COUNT: usize;

    /// Invalidates the data cache lines covering the given address range, so that the next read
    /// fetches what other cores have written.
    fn invalidate_dcache_range(&self, addr: usize, size: usize);

    /// Cleans the data cache lines covering the given address range to the point of coherency, so
    /// that other cores can observe what this core has written.
    fn clean_dcache_range(&self, addr: usize, size: usize);

    /// Blocks the current core for at least the given number of milliseconds.
    fn sleep_ms(&self, ms: u32);

    /// Given an MPIDR value, returns the corresponding linear core index.
    ///
    /// The implementation must never return the same index for two different valid MPIDR values,
    /// and must never return a value greater than or equal to `CORE_COUNT`.
    fn core_position(&self, mpidr: u64) -> usize;
}

/// Invalidates the data cache lines covering the given value.
pub fn invalidate_dcache<P: Platform, T: ?Sized>(platform: &P, value: &T) {
    platform.invalidate_dcache_range(value as *const T as *const u8 as usize, size_of_val(value));
}

/// Cleans the data cache lines covering the given value.
pub fn clean_dcache<P: Platform, T: ?Sized>(platform: &P, value: &T) {
    platform.clean_dcache_range(value as *const T as *const u8 as usize, size_of_val(value));
}
