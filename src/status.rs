// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Test outcome bookkeeping.
//!
//! An outcome is reported as a packed status word holding a [`TestState`] in the top byte and an
//! implementation-defined status code in the low 24 bits. Repeated reports are folded together by
//! [`merge`] so that a test which partly skipped is never reported as a clean pass.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::mutex::SpinMutex;
use thiserror::Error;

const TEST_STATE_SHIFT: u32 = 24;
const TEST_STATE_MASK: u32 = 0xff;
const TEST_STATUS_CODE_MASK: u32 = 0x00ff_ffff;

/// Status code of an outcome which hasn't been reported yet.
pub const STATUS_INVALID: u32 = 0x10;

/// The state component of a test outcome.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum TestState {
    /// The test failed, or hasn't reported yet.
    Fail = 0,
    /// The test passed.
    Pass = 1,
    /// The test didn't run, because something it needs is missing.
    Skip = 2,
    /// Some parts of the test passed and the rest were skipped.
    PassWithSkip = 3,
    /// The test asked for a platform reset and expects to be resumed afterwards.
    Rebooting = 4,
}

/// Folds a newly reported state into the current one.
pub fn merge(current: TestState, incoming: TestState) -> TestState {
    match (current, incoming) {
        (TestState::PassWithSkip, TestState::Pass | TestState::Skip)
        | (TestState::Pass, TestState::Skip)
        | (TestState::Skip, TestState::Pass) => TestState::PassWithSkip,
        (_, incoming) => incoming,
    }
}

/// A packed test outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TestStatus {
    /// The state of the test.
    pub state: TestState,
    code: u32,
}

impl TestStatus {
    /// The outcome of a test which hasn't reported anything yet.
    pub const INVALID: Self = Self::new(TestState::Fail, STATUS_INVALID);

    /// Creates a new outcome. Bits of `code` above the status code width are dropped.
    pub const fn new(state: TestState, code: u32) -> Self {
        Self {
            state,
            code: code & TEST_STATUS_CODE_MASK,
        }
    }

    /// Returns the status code.
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// Returns the packed status word.
    pub const fn bits(self) -> u32 {
        ((self.state as u32) << TEST_STATE_SHIFT) | self.code
    }
}

impl From<TestStatus> for u32 {
    fn from(status: TestStatus) -> Self {
        status.bits()
    }
}

impl TryFrom<u32> for TestStatus {
    type Error = InvalidTestState;

    fn try_from(word: u32) -> Result<Self, InvalidTestState> {
        let state = (word >> TEST_STATE_SHIFT) & TEST_STATE_MASK;
        let state = TestState::try_from(state).map_err(|_| InvalidTestState(state))?;
        Ok(Self::new(state, word))
    }
}

/// A status word held a test state which doesn't exist.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("Invalid test state {0:#x} in status word")]
pub struct InvalidTestState(pub u32);

/// Accumulates the outcome reports of the running test.
pub struct StatusBuffer {
    status: SpinMutex<TestStatus>,
}

impl StatusBuffer {
    /// Creates a buffer holding [`TestStatus::INVALID`].
    pub const fn new() -> Self {
        Self {
            status: SpinMutex::new(TestStatus::INVALID),
        }
    }

    /// Records a new report, merging its state with the previous ones.
    ///
    /// The status code is always replaced with the newest one.
    pub fn report(&self, report: TestStatus) {
        let mut status = self.status.lock();
        *status = TestStatus::new(merge(status.state, report.state), report.code);
    }

    /// Records a report given as a packed status word.
    pub fn report_packed(&self, word: u32) -> Result<(), InvalidTestState> {
        self.report(TestStatus::try_from(word)?);
        Ok(())
    }

    /// Returns the accumulated outcome.
    pub fn status(&self) -> TestStatus {
        *self.status.lock()
    }

    /// Forgets all reports, ready for the next test.
    pub fn reset(&self) {
        *self.status.lock() = TestStatus::INVALID;
    }
}

impl Default for StatusBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of the test running in this partition.
pub static STATUS: StatusBuffer = StatusBuffer::new();

/// Records a packed status word for the running test.
pub fn report_status(word: u32) -> Result<(), InvalidTestState> {
    STATUS.report_packed(word)
}

/// Returns the packed status word of the running test.
pub fn read_status() -> u32 {
    STATUS.status().into()
}
