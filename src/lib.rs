// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Validation framework for FF-A partitions.
//!
//! Tests are written once and run cooperatively across partitions and cores. The framework owns
//! the direct-message plumbing between partitions, the client/server test handshake, multi-core
//! rendezvous, outcome bookkeeping and the NVM and watchdog services used to survive resets.

#![cfg_attr(not(test), no_std)]

#[cfg(all(target_arch = "aarch64", not(test)))]
pub mod aarch64;
pub mod dispatch;
pub mod logger;
pub mod multi_pe;
pub mod platform;
pub mod rpc;
pub mod services;
pub mod status;

/// Status word returned in a direct message response when an operation succeeded.
pub const VAL_SUCCESS: u32 = 0;

/// Status word returned in a direct message response when an operation failed.
pub const VAL_ERROR: u32 = u32::MAX;
