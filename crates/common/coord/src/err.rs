// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{sync::Arc, time::Duration};

use derive_more::Display;
use snafu::Snafu;
use wharf_common_store::StoreError;

/// Error returned by a [`PowerHooks`](crate::PowerHooks) implementation.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

// ============================================================================
// Lock Errors
// ============================================================================

/// Why an acquisition attempt gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AcquireCause {
    /// Another owner holds the lock and retries are disabled.
    #[display("lock is held by another owner")]
    Contended,
    /// Retries were enabled but the lock stayed taken for the whole window.
    #[display("still held after waiting {waited:?}")]
    TimedOut { waited: Duration },
}

/// Errors raised by [`LockManager`](crate::LockManager).
///
/// `Acquire`, `Extend` and `Release` are logical outcomes of contention and
/// ownership. `Store` is an infrastructure failure: the store could not be
/// reached, and nothing is known about who owns the key.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LockError {
    #[snafu(display("Failed to acquire lock `{key}`: {cause}"))]
    Acquire {
        key:   String,
        cause: AcquireCause,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display("Cannot extend lock `{key}`: not the current holder"))]
    Extend {
        key: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Cannot release lock `{key}`: not the current holder"))]
    Release {
        key: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Acquisition of lock `{key}` was cancelled"))]
    Cancelled {
        key: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Store failure on lock `{key}`"))]
    Store {
        key:    String,
        source: StoreError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl LockError {
    /// Returns `true` for store connectivity failures, as opposed to
    /// ownership or contention outcomes.
    pub fn is_infrastructure(&self) -> bool { matches!(self, LockError::Store { .. }) }

    /// Returns `true` if the lock was taken and no retry was allowed.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Acquire {
            cause: AcquireCause::Contended,
            ..
        })
    }

    /// Returns `true` if retrying ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Acquire {
            cause: AcquireCause::TimedOut { .. },
            ..
        })
    }
}

// ============================================================================
// Power Errors
// ============================================================================

/// Direction of a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Direction {
    #[display("up")]
    Up,
    #[display("down")]
    Down,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Errors raised by [`PowerManager`](crate::PowerManager).
///
/// Cloneable so every caller waiting on the same transition receives the
/// same outcome.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum PowerError {
    /// The startup or shutdown hook failed. State reverted to its value
    /// before the transition.
    #[snafu(display("`{name}` failed to go {direction}"))]
    Transition {
        name:      String,
        direction: Direction,
        source:    Arc<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    /// The task driving the transition went away before reporting back.
    #[snafu(display("`{name}` transition was interrupted"))]
    Interrupted {
        name: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },
}

// ============================================================================
// Ticker Errors
// ============================================================================

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TickerError {
    #[snafu(display("Ticker interval must be greater than zero"))]
    ZeroInterval {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}
