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

use std::{fmt, time::Duration};

use derive_more::Display;
use snafu::Snafu;
use wharf_common_coord::{LockError, PowerError, PowerState};

use crate::id::WorkerId;

// ============================================================================
// Work Error Types
// ============================================================================

/// Result type for worker operations.
pub type WorkResult<T = ()> = std::result::Result<T, WorkError>;

/// Error severity level for worker operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient error - the worker keeps its schedule and runs again on the
    /// next tick.
    ///
    /// Use this for recoverable errors like:
    /// - Network timeouts
    /// - Temporary resource unavailability
    /// - Rate limiting
    Transient,

    /// Fatal error - the worker stops running until it is brought down and
    /// up again.
    ///
    /// Use this for unrecoverable errors like:
    /// - Configuration errors
    /// - Missing required resources
    /// - Data corruption
    Fatal,
}

/// Errors returned by [`Worker`](crate::Worker) hooks.
///
/// An error from `on_start()` fails the worker's startup, and an error from
/// `on_shutdown()` fails its shutdown. Errors from `run()` are published as
/// [`WorkerEvent::RunFailed`](crate::WorkerEvent::RunFailed); their severity
/// decides whether the schedule continues.
///
/// # Example
///
/// ```rust
/// use wharf_common_worker::{WorkError, WorkResult};
///
/// async fn do_work() -> WorkResult {
///     // Transient error - worker continues
///     if network_unavailable() {
///         return Err(WorkError::transient("Network temporarily unavailable"));
///     }
///
///     // Fatal error - worker stops
///     if config_invalid() {
///         return Err(WorkError::fatal("Invalid configuration"));
///     }
///
///     Ok(())
/// }
/// # fn network_unavailable() -> bool { false }
/// # fn config_invalid() -> bool { false }
/// ```
#[derive(Debug)]
pub struct WorkError {
    severity: ErrorSeverity,
    message:  String,
    source:   Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl WorkError {
    /// Creates a new transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        WorkError {
            severity: ErrorSeverity::Transient,
            message:  message.into(),
            source:   None,
        }
    }

    /// Creates a new fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        WorkError {
            severity: ErrorSeverity::Fatal,
            message:  message.into(),
            source:   None,
        }
    }

    /// Creates a transient error with a source error.
    pub fn transient_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WorkError {
            severity: ErrorSeverity::Transient,
            message:  message.into(),
            source:   Some(Box::new(source)),
        }
    }

    /// Creates a fatal error with a source error.
    pub fn fatal_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WorkError {
            severity: ErrorSeverity::Fatal,
            message:  message.into(),
            source:   Some(Box::new(source)),
        }
    }

    pub fn severity(&self) -> ErrorSeverity { self.severity }

    pub fn is_fatal(&self) -> bool { self.severity == ErrorSeverity::Fatal }

    pub fn is_transient(&self) -> bool { self.severity == ErrorSeverity::Transient }

    pub fn message(&self) -> &str { &self.message }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            ErrorSeverity::Transient => "transient",
            ErrorSeverity::Fatal => "fatal",
        };
        write!(f, "[{severity}] {}", self.message)
    }
}

impl std::error::Error for WorkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ============================================================================
// Pool Errors
// ============================================================================

/// Why one pool member did not reach the requested state.
#[derive(Debug, Clone, Display)]
pub enum MemberCause {
    /// The member's startup or shutdown hook failed.
    #[display("{_0}")]
    Transition(PowerError),
    /// The member did not confirm within the shutdown timeout.
    #[display("no confirmation within {waited:?}")]
    Hung { waited: Duration },
}

/// A member that failed during a pool-level operation.
#[derive(Debug, Clone, Display)]
#[display("{name} ({id}): {cause}")]
pub struct MemberFailure {
    pub id:    WorkerId,
    pub name:  &'static str,
    pub cause: MemberCause,
}

impl MemberFailure {
    pub fn is_hung(&self) -> bool { matches!(self.cause, MemberCause::Hung { .. }) }
}

fn describe(failures: &[MemberFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PoolError {
    /// At least one member failed to start. Members that did start were
    /// brought back down; `rollback_failures` lists those that refused.
    #[snafu(display("Pool failed to start: {}", describe(failures)))]
    Startup {
        failures:          Vec<MemberFailure>,
        rollback_failures: Vec<MemberFailure>,
        #[snafu(implicit)]
        loc:               snafu::Location,
    },

    /// At least one member failed to stop or hung past the shutdown timeout.
    #[snafu(display("Pool failed to stop: {}", describe(failures)))]
    Shutdown {
        failures: Vec<MemberFailure>,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Pool is in the middle of another operation"))]
    Busy {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Workers can only be added while the pool is DOWN, it is {state}"))]
    NotDown {
        state: PowerState,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display("No pool member with id {id}"))]
    UnknownMember {
        id:  WorkerId,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

impl PoolError {
    /// Members that caused the failure, if any.
    pub fn failures(&self) -> &[MemberFailure] {
        match self {
            PoolError::Startup { failures, .. } | PoolError::Shutdown { failures, .. } => failures,
            _ => &[],
        }
    }
}

// ============================================================================
// Runner Errors
// ============================================================================

/// Errors raised by [`WorkerRunner`](crate::WorkerRunner).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunnerError {
    #[snafu(display("Runner could not take its lock"))]
    Lock {
        source: LockError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Runner pool failed"))]
    Pool {
        source: PoolError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Runner `{name}` failed to change state"))]
    Power {
        name:   String,
        source: PowerError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}
