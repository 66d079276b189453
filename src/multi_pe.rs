// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Rendezvous between the cores taking part in a multi-core test.
//!
//! The core coordinating a test publishes the test number, then each peer core marks its slot as
//! in progress, runs its part and publishes its result. The coordinator polls each peer's slot and
//! resets it once the result has been consumed.

use crate::{
    platform::{Platform, clean_dcache, invalidate_dcache},
    status::TestStatus,
};
use core::sync::atomic::{AtomicU32, Ordering};
use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The number of times to check a peer's state before giving up on it.
pub const PEER_POLL_ATTEMPTS: u32 = 5;

/// How long to sleep between checks of a peer's state.
pub const PEER_POLL_INTERVAL_MS: u32 = 1;

/// The affinity fields of MPIDR_EL1.
const MPIDR_AFFINITY_MASK: u64 = 0xff_00ff_ffff;

/// The progress of a peer core through the current test.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum PeerState {
    /// The core hasn't started the current test.
    Wait = 0,
    /// The core is running its part of the test.
    InProgress = 1,
    /// The core has published its outcome.
    Complete = 2,
}

/// Per-core state of a multi-core test, shared between all cores.
///
/// Cores are not assumed to be coherent with each other, so every access is bracketed by cache
/// maintenance through the [`Platform`].
pub struct PeerTable<const CORES: usize> {
    current_test_number: AtomicU32,
    state: [AtomicU32; CORES],
    result: [AtomicU32; CORES],
}

impl<const CORES: usize> PeerTable<CORES> {
    /// Creates a table with every core waiting.
    pub const fn new() -> Self {
        Self {
            current_test_number: AtomicU32::new(0),
            state: [const { AtomicU32::new(PeerState::Wait as u32) }; CORES],
            result: [const { AtomicU32::new(TestStatus::INVALID.bits()) }; CORES],
        }
    }

    /// Publishes the number of the test which peer cores are about to run.
    pub fn start_test<P: Platform>(&self, platform: &P, test_num: u32) {
        self.current_test_number.store(test_num, Ordering::Relaxed);
        clean_dcache(platform, &self.current_test_number);
    }

    /// Returns the number of the test currently being run.
    pub fn current_test<P: Platform>(&self, platform: &P) -> u32 {
        invalidate_dcache(platform, &self.current_test_number);
        self.current_test_number.load(Ordering::Relaxed)
    }

    /// Marks the given core as having started its part of the current test.
    pub fn begin<P: Platform>(&self, platform: &P, core: usize) {
        self.state[core].store(PeerState::InProgress.into(), Ordering::Relaxed);
        clean_dcache(platform, &self.state[core]);
    }

    /// Publishes the outcome of the given core's part of the current test.
    pub fn complete<P: Platform>(&self, platform: &P, core: usize, status: TestStatus) {
        self.result[core].store(status.into(), Ordering::Relaxed);
        clean_dcache(platform, &self.result[core]);
        self.state[core].store(PeerState::Complete.into(), Ordering::Relaxed);
        clean_dcache(platform, &self.state[core]);
    }

    fn peer_state<P: Platform>(&self, platform: &P, core: usize) -> PeerState {
        invalidate_dcache(platform, &self.state[core]);
        let state = self.state[core].load(Ordering::Relaxed);
        PeerState::try_from(state)
            .unwrap_or_else(|_| panic!("Core {core} has invalid peer state {state:#x}"))
    }

    /// Waits for the given peer core to finish its part of the given test, and returns its
    /// outcome.
    ///
    /// The peer's slot is reset once its outcome has been read, ready for the next test. Panics if
    /// the test number doesn't match, or if the peer doesn't complete in time.
    pub fn wait_for_peer<P: Platform>(
        &self,
        platform: &P,
        core: usize,
        test_num: u32,
    ) -> TestStatus {
        assert!(core < CORES, "Core {core} out of range");

        let current = self.current_test(platform);
        if current != test_num {
            panic!("Peers are running test {current}, expected test {test_num}");
        }

        let mut state = self.peer_state(platform, core);
        let mut attempts = 1;
        while state == PeerState::InProgress && attempts < PEER_POLL_ATTEMPTS {
            platform.sleep_ms(PEER_POLL_INTERVAL_MS);
            state = self.peer_state(platform, core);
            attempts += 1;
        }
        if state != PeerState::Complete {
            panic!("Core {core} didn't complete test {test_num}, state {state:?}");
        }

        invalidate_dcache(platform, &self.result[core]);
        let result = self.result[core].load(Ordering::Relaxed);
        let status = TestStatus::try_from(result)
            .unwrap_or_else(|e| panic!("Core {core} reported bad outcome: {e}"));
        debug!("Core {core} finished test {test_num} with {status:?}");

        self.state[core].store(PeerState::Wait.into(), Ordering::Relaxed);
        self.result[core].store(TestStatus::INVALID.into(), Ordering::Relaxed);
        clean_dcache(platform, &self.state[core]);
        clean_dcache(platform, &self.result[core]);

        status
    }
}

impl<const CORES: usize> Default for PeerTable<CORES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the linear index of the core with the given MPIDR value.
pub fn core_index_for_mpidr<P: Platform>(platform: &P, mpidr: u64) -> usize {
    let index = platform.core_position(mpidr & MPIDR_AFFINITY_MASK);
    assert!(index < P::CORE_COUNT, "Bad core index {index} for MPIDR {mpidr:#x}");
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{platform::test::TestPlatform, status::TestState};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn complete_peer_returns_immediately() {
        let table = PeerTable::<4>::new();
        let platform = TestPlatform::new();
        let status = TestStatus::new(TestState::Pass, 5);

        table.start_test(&platform, 7);
        table.begin(&platform, 1);
        table.complete(&platform, 1, status);
        assert_eq!(table.wait_for_peer(&platform, 1, 7), status);
        assert_eq!(platform.sleeps(), 0);
        assert!(platform.invalidations.load(Ordering::SeqCst) >= 3);
        assert!(platform.cleans.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn peer_completing_while_polled() {
        let table = PeerTable::<4>::new();
        let status = TestStatus::new(TestState::Skip, 0);
        let platform = TestPlatform::with_sleep_hook(|sleeps| {
            if sleeps == 2 {
                table.complete(&TestPlatform::new(), 3, status);
            }
        });

        table.start_test(&platform, 9);
        table.begin(&platform, 3);
        assert_eq!(table.wait_for_peer(&platform, 3, 9), status);
        assert_eq!(platform.sleeps(), 2);
    }

    #[test]
    fn stuck_peer_is_fatal() {
        let table = PeerTable::<4>::new();
        let platform = TestPlatform::new();

        table.start_test(&platform, 7);
        table.begin(&platform, 2);
        let result = catch_unwind(AssertUnwindSafe(|| table.wait_for_peer(&platform, 2, 7)));
        assert!(result.is_err());
        assert_eq!(platform.sleeps(), PEER_POLL_ATTEMPTS - 1);
    }

    #[test]
    #[should_panic(expected = "didn't complete")]
    fn repeated_wait_is_fatal() {
        let table = PeerTable::<4>::new();
        let platform = TestPlatform::new();

        table.start_test(&platform, 7);
        table.begin(&platform, 0);
        table.complete(&platform, 0, TestStatus::new(TestState::Pass, 0));
        table.wait_for_peer(&platform, 0, 7);
        table.wait_for_peer(&platform, 0, 7);
    }

    #[test]
    #[should_panic(expected = "expected test 7")]
    fn test_number_mismatch_is_fatal() {
        let table = PeerTable::<4>::new();
        let platform = TestPlatform::new();

        table.start_test(&platform, 3);
        table.begin(&platform, 1);
        table.complete(&platform, 1, TestStatus::new(TestState::Pass, 0));
        table.wait_for_peer(&platform, 1, 7);
    }

    #[test]
    fn core_index() {
        let platform = TestPlatform::new();
        assert_eq!(core_index_for_mpidr(&platform, 0x8000_0000), 0);
        assert_eq!(core_index_for_mpidr(&platform, 0x8000_0101), 3);
        assert_eq!(core_index_for_mpidr(&platform, 0x0000_0100), 2);
    }
}
