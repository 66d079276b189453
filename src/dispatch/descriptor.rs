// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use crate::rpc::LogicalId;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

const CLIENT_SHIFT: u32 = 16;
const SERVER_SHIFT: u32 = 20;
const TEST_TYPE_SHIFT: u32 = 24;
const LOGICAL_ID_MASK: u32 = 0xf;
const TEST_TYPE_MASK: u32 = 0x3;
const RESERVED_MASK: u32 = 0xfc00_0000;

/// Which half of a test a descriptor asks for.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum TestType {
    /// The half which drives the test and reports its outcome.
    Client = 0,
    /// The half which answers the client's requests.
    Server = 1,
}

/// Identifies a test and the two endpoints taking part in it.
///
/// Packs into a single word with the test number in bits [15:0], the client logical ID in bits
/// [19:16], the server logical ID in bits [23:20] and the test type in bits [25:24]. The remaining
/// bits are zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TestDescriptor {
    /// The number the test is registered under.
    pub test_num: u16,
    /// The endpoint running the client half.
    pub client: LogicalId,
    /// The endpoint running the server half.
    pub server: LogicalId,
    /// Which half the receiver should run.
    pub test_type: TestType,
}

impl TestDescriptor {
    /// Creates a new descriptor.
    pub const fn new(
        test_num: u16,
        client: LogicalId,
        server: LogicalId,
        test_type: TestType,
    ) -> Self {
        Self {
            test_num,
            client,
            server,
            test_type,
        }
    }

    /// Returns a copy of the descriptor with the test type replaced.
    pub const fn with_test_type(self, test_type: TestType) -> Self {
        Self { test_type, ..self }
    }
}

impl From<TestDescriptor> for u32 {
    fn from(descriptor: TestDescriptor) -> Self {
        u32::from(descriptor.test_num)
            | (u32::from(descriptor.client.0) & LOGICAL_ID_MASK) << CLIENT_SHIFT
            | (u32::from(descriptor.server.0) & LOGICAL_ID_MASK) << SERVER_SHIFT
            | u32::from(u8::from(descriptor.test_type)) << TEST_TYPE_SHIFT
    }
}

impl TryFrom<u32> for TestDescriptor {
    type Error = ParseDescriptorError;

    fn try_from(word: u32) -> Result<Self, Self::Error> {
        if word & RESERVED_MASK != 0 {
            return Err(ParseDescriptorError::ReservedBitsSet(word));
        }
        let test_type = ((word >> TEST_TYPE_SHIFT) & TEST_TYPE_MASK) as u8;
        Ok(Self {
            test_num: word as u16,
            client: LogicalId(((word >> CLIENT_SHIFT) & LOGICAL_ID_MASK) as u8),
            server: LogicalId(((word >> SERVER_SHIFT) & LOGICAL_ID_MASK) as u8),
            test_type: TestType::try_from(test_type)
                .map_err(|_| ParseDescriptorError::UnknownTestType(test_type))?,
        })
    }
}

/// A word couldn't be parsed as a test descriptor.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ParseDescriptorError {
    /// The test type field held a value other than client or server.
    #[error("Unknown test type {0}")]
    UnknownTestType(u8),
    /// Some of the bits which must be zero were set.
    #[error("Reserved bits set in test descriptor {0:#010x}")]
    ReservedBitsSet(u32),
}
