// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Backends for partitions running on bare-metal AArch64.

use crate::{multi_pe::core_index_for_mpidr, platform::Platform, rpc::MessageChannel};
use arm_ffa::{Interface, Version};
use arm_sysregs::read_mpidr_el1;
use core::arch::asm;
use smccc::smc64;

/// The FF-A version which we implement here.
const FFA_VERSION: Version = Version(1, 2);

/// The smallest data cache line size of any supported core.
pub const CACHE_LINE_SIZE: usize = 1 << 6;

/// Makes FF-A calls to the partition manager with the `SMC` instruction.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmcChannel;

impl MessageChannel for SmcChannel {
    fn call(&self, interface: Interface) -> Result<Interface, arm_ffa::Error> {
        let regs = call_raw(interface);
        Interface::from_regs(FFA_VERSION, &regs)
    }
}

fn call_raw(interface: Interface) -> [u64; 18] {
    let Some(function_id) = interface.function_id() else {
        panic!("No function ID for {interface:?}");
    };
    let mut regs = [0; 18];
    interface.to_regs(FFA_VERSION, &mut regs);
    let mut args = [0; 17];
    args.copy_from_slice(&regs[1..]);
    smc64(u32::from(function_id), args)
}

/// Cleans and invalidates the data cache lines covering the given range to the point of
/// coherency.
///
/// Lines are cleaned as well as invalidated, so that any neighbouring data this core has written
/// to the same lines isn't lost.
pub fn invalidate_dcache_range(addr: usize, size: usize) {
    for line in lines(addr, size) {
        // SAFETY: Cleaning and invalidating a cache line doesn't change the contents of memory as
        // observed by this core.
        unsafe {
            asm!("dc civac, {}", in(reg) line, options(nostack, preserves_flags));
        }
    }
    dsb_sy();
}

/// Cleans the data cache lines covering the given range to the point of coherency.
pub fn clean_dcache_range(addr: usize, size: usize) {
    for line in lines(addr, size) {
        // SAFETY: Cleaning a cache line doesn't change the contents of memory as observed by this
        // core.
        unsafe {
            asm!("dc cvac, {}", in(reg) line, options(nostack, preserves_flags));
        }
    }
    dsb_sy();
}

fn lines(addr: usize, size: usize) -> impl Iterator<Item = usize> {
    let start = addr & !(CACHE_LINE_SIZE - 1);
    (start..addr + size).step_by(CACHE_LINE_SIZE)
}

fn dsb_sy() {
    // SAFETY: A barrier has no effect on memory safety.
    unsafe {
        asm!("dsb sy", options(nostack, preserves_flags));
    }
}

/// Returns the MPIDR value of the current core.
pub fn current_mpidr() -> u64 {
    read_mpidr_el1().bits()
}

/// Returns the linear index of the current core.
pub fn current_core_index<P: Platform>(platform: &P) -> usize {
    core_index_for_mpidr(platform, current_mpidr())
}
