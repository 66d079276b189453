// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Registry of the tests built into a partition.

use super::{Dispatcher, TestDescriptor};
use crate::status::TestStatus;
use linkme::distributed_slice;

/// Runs the client half of a test, and returns its outcome.
pub type ClientFn = fn(&Dispatcher<'_>, TestDescriptor) -> TestStatus;

/// Runs the server half of a test with the arguments sent by the client, and returns the words to
/// send back to it.
pub type ServerFn = fn(&Dispatcher<'_>, TestDescriptor, [u32; 4]) -> [u32; 5];

/// The tests built into this partition.
#[distributed_slice]
pub static PARTITION_TESTS: [PartitionTest];

/// A test which may run across partitions.
#[derive(Clone, Copy)]
pub struct PartitionTest {
    /// The number which descriptors refer to the test by.
    pub test_num: u16,
    /// The full path of the test.
    pub name: &'static str,
    /// The client half, if this partition can run it.
    pub client: Option<ClientFn>,
    /// The server half, if this partition can run it.
    pub server: Option<ServerFn>,
}

impl PartitionTest {
    /// Returns the name of the test, without the crate name.
    pub fn name(&self) -> &'static str {
        match self.name.split_once("::") {
            Some((_, rest)) => rest,
            None => self.name,
        }
    }
}

/// Returns the registered test with the given number, if any.
pub fn find_test(test_num: u16) -> Option<&'static PartitionTest> {
    PARTITION_TESTS.iter().find(|test| test.test_num == test_num)
}

/// Registers a partition test.
///
/// Either half may be omitted, if this partition never plays that role.
#[macro_export]
macro_rules! partition_test {
    ($test_num:literal, $name:ident, client = $client:ident, server = $server:ident) => {
        $crate::partition_test!(@register $test_num, $name, Some($client), Some($server));
    };
    ($test_num:literal, $name:ident, client = $client:ident) => {
        $crate::partition_test!(@register $test_num, $name, Some($client), None);
    };
    ($test_num:literal, $name:ident, server = $server:ident) => {
        $crate::partition_test!(@register $test_num, $name, None, Some($server));
    };
    (@register $test_num:literal, $name:ident, $client:expr, $server:expr) => {
        paste::paste! {
            #[linkme::distributed_slice($crate::dispatch::registry::PARTITION_TESTS)]
            static [<_PARTITION_TEST_ $name:upper>]: $crate::dispatch::PartitionTest = $crate::dispatch::PartitionTest {
                test_num: $test_num,
                name: concat!(module_path!(), "::", ::core::stringify!($name)),
                client: $client,
                server: $server,
            };
        }
    };
}
