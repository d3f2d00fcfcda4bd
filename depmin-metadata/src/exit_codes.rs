// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `depmin` failures.
///
/// `depmin` runs may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum DepminExitCode {}

impl DepminExitCode {
    /// No errors occurred and every minimization was verified.
    pub const OK: i32 = 0;

    /// At least one dependent test could not be minimized, was found to be flaky, or produced a
    /// result that could not be verified.
    pub const MINIMIZATION_INCOMPLETE: i32 = 100;

    /// The dependent test list could not be read or parsed.
    pub const DEPENDENT_TEST_LIST_ERROR: i32 = 104;

    /// The result store could not be opened or a record could not be read.
    pub const STORE_ERROR: i32 = 105;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a depmin invocation.
    pub const SETUP_ERROR: i32 = 96;
}
