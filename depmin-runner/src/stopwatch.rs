// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long oracle runs and sessions take.
//!
//! Durations are measured with the monotonic clock.

use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            instant: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            duration: self.instant.elapsed(),
        }
    }
}

/// A snapshot of the state of the stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    /// The amount of time elapsed since the start.
    pub(crate) duration: Duration,
}
