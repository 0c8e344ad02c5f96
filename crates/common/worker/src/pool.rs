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

use std::fmt;

use futures::future::join_all;
use parking_lot::Mutex;
use snafu::ensure;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use wharf_common_coord::PowerState;

use crate::{
    config::PoolConfig,
    err::{
        BusySnafu, MemberCause, MemberFailure, NotDownSnafu, PoolError, ShutdownSnafu,
        StartupSnafu, UnknownMemberSnafu,
    },
    handle::WorkerHandle,
    id::WorkerId,
    metrics::{POOL_HUNG_MEMBERS, POOL_ROLLBACKS, POOL_STARTUPS},
};

const EVENT_CAPACITY: usize = 32;

/// Pool-level notifications. Failures are reported here as well as to the
/// caller of the failed operation.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Up,
    Down,
    StartupFailed { failures: Vec<MemberFailure> },
    /// Members that had started were brought back down after a failed startup.
    RolledBack {
        members:  Vec<WorkerId>,
        failures: Vec<MemberFailure>,
    },
    ShutdownFailed { failures: Vec<MemberFailure> },
}

/// Starts and stops a group of workers as a unit.
///
/// `up()` starts every member concurrently and succeeds only if all of them
/// do; otherwise the members that started are brought back down. `down()`
/// stops every member concurrently, waiting at most the shutdown timeout.
/// Pool operations are serialized.
///
/// The pool's state is derived from its members on every call and never
/// stored.
pub struct WorkerPool {
    config:  PoolConfig,
    members: Mutex<Vec<WorkerHandle>>,
    op:      tokio::sync::Mutex<()>,
    events:  broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        WorkerPool {
            config,
            members: Mutex::new(Vec::new()),
            op: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn config(&self) -> &PoolConfig { &self.config }

    /// Adds a member. Only allowed while the pool, and the worker itself, are
    /// `DOWN` and no other pool operation is running.
    pub fn add(&self, worker: WorkerHandle) -> Result<WorkerId, PoolError> {
        let Ok(_op) = self.op.try_lock() else {
            return BusySnafu.fail();
        };
        let state = self.state();
        ensure!(state == PowerState::Down, NotDownSnafu { state });
        let state = worker.state();
        ensure!(state == PowerState::Down, NotDownSnafu { state });

        let id = worker.id();
        info!(worker = worker.name(), %id, "Worker added to pool");
        self.members.lock().push(worker);
        Ok(id)
    }

    /// Brings one member down and removes it. Other members are untouched.
    ///
    /// The member stays in the pool if it fails to stop.
    pub async fn remove(&self, id: WorkerId) -> Result<WorkerHandle, PoolError> {
        let _op = self.op.lock().await;
        let member = self.members.lock().iter().find(|m| m.id() == id).cloned();
        let Some(member) = member else {
            return UnknownMemberSnafu { id }.fail();
        };

        if let Err(failure) = self.stop_member(&member).await {
            error!(worker = member.name(), %id, cause = %failure.cause, "Failed to remove worker");
            return ShutdownSnafu {
                failures: vec![failure],
            }
            .fail();
        }

        self.members.lock().retain(|m| m.id() != id);
        info!(worker = member.name(), %id, "Worker removed from pool");
        Ok(member)
    }

    /// Snapshot of the current members.
    pub fn members(&self) -> Vec<WorkerHandle> { self.members.lock().clone() }

    pub fn len(&self) -> usize { self.members.lock().len() }

    pub fn is_empty(&self) -> bool { self.members.lock().is_empty() }

    /// Aggregate state: `UP` iff every member is `UP`, `DOWN` iff every member
    /// is `DOWN` (an empty pool is `DOWN`). Any member in flight makes the
    /// pool report that transition, shutdown first. Settled but mixed members
    /// (left by a failed operation) report `GOING_DOWN`, since only `down()`
    /// converges them.
    pub fn state(&self) -> PowerState {
        let members = self.members.lock();
        let states: Vec<_> = members.iter().map(WorkerHandle::state).collect();
        drop(members);
        aggregate(&states)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> { self.events.subscribe() }

    /// Brings every member up.
    ///
    /// On any member failure, the members that did start are brought back
    /// down and [`PoolError::Startup`] lists every failing member.
    pub async fn up(&self) -> Result<(), PoolError> {
        let _op = self.op.lock().await;
        let members = self.members();
        if members.iter().all(|m| m.state() == PowerState::Up) {
            return Ok(());
        }

        let results = join_all(members.iter().map(|member| async move {
            member.up().await.map_err(|e| MemberFailure {
                id:    member.id(),
                name:  member.name(),
                cause: MemberCause::Transition(e),
            })
        }))
        .await;

        let mut started = Vec::new();
        let mut failures = Vec::new();
        for (member, result) in members.iter().zip(results) {
            match result {
                Ok(()) => started.push(member),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            POOL_STARTUPS.with_label_values(&["ok"]).inc();
            info!(members = members.len(), "Worker pool is up");
            self.emit(PoolEvent::Up);
            return Ok(());
        }

        POOL_STARTUPS.with_label_values(&["failed"]).inc();
        for failure in &failures {
            error!(worker = failure.name, id = %failure.id, cause = %failure.cause, "Worker failed to start");
        }
        self.emit(PoolEvent::StartupFailed {
            failures: failures.clone(),
        });

        let rollback_failures = self.roll_back(&started).await;
        StartupSnafu {
            failures,
            rollback_failures,
        }
        .fail()
    }

    /// Brings every member down, waiting at most the shutdown timeout.
    ///
    /// Members that do not confirm in time are reported as hung in
    /// [`PoolError::Shutdown`]; their transitions keep running in the
    /// background.
    pub async fn down(&self) -> Result<(), PoolError> {
        let _op = self.op.lock().await;
        let members = self.members();
        if members.iter().all(|m| m.state() == PowerState::Down) {
            return Ok(());
        }

        let results = join_all(members.iter().map(|member| self.stop_member(member))).await;
        let failures: Vec<_> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            info!(members = members.len(), "Worker pool is down");
            self.emit(PoolEvent::Down);
            return Ok(());
        }

        for failure in &failures {
            error!(worker = failure.name, id = %failure.id, cause = %failure.cause, "Worker failed to stop");
        }
        self.emit(PoolEvent::ShutdownFailed {
            failures: failures.clone(),
        });
        ShutdownSnafu { failures }.fail()
    }

    async fn stop_member(&self, member: &WorkerHandle) -> Result<(), MemberFailure> {
        let timeout = self.config.shutdown_timeout();
        let cause = match tokio::time::timeout(timeout, member.down()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => MemberCause::Transition(e),
            Err(_) => {
                POOL_HUNG_MEMBERS.inc();
                warn!(worker = member.name(), id = %member.id(), ?timeout, "Worker did not stop in time");
                MemberCause::Hung { waited: timeout }
            }
        };
        Err(MemberFailure {
            id: member.id(),
            name: member.name(),
            cause,
        })
    }

    /// Compensates a failed startup by stopping the members that started.
    /// Returns the members that could not be stopped.
    async fn roll_back(&self, started: &[&WorkerHandle]) -> Vec<MemberFailure> {
        let attempts = self.config.rollback_retries() + 1;
        let results = join_all(started.iter().map(|member| async move {
            let mut last = None;
            for attempt in 1..=attempts {
                match self.stop_member(member).await {
                    Ok(()) => return Ok(()),
                    Err(failure) => {
                        warn!(worker = member.name(), attempt, cause = %failure.cause, "Rollback of worker failed");
                        // A hung member is still stopping; asking again cannot help.
                        let hung = failure.is_hung();
                        last = Some(failure);
                        if hung {
                            break;
                        }
                    }
                }
            }
            last.map_or(Ok(()), Err)
        }))
        .await;

        POOL_ROLLBACKS.inc_by(started.len() as u64);
        let failures: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        let rolled_back = started
            .iter()
            .map(|member| member.id())
            .filter(|id| !failures.iter().any(|failure| failure.id == *id))
            .collect();
        info!(
            rolled_back = started.len() - failures.len(),
            failed = failures.len(),
            "Rolled back worker pool startup"
        );
        self.emit(PoolEvent::RolledBack {
            members:  rolled_back,
            failures: failures.clone(),
        });
        failures
    }

    fn emit(&self, event: PoolEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("members", &self.len())
            .field("state", &self.state())
            .finish()
    }
}

fn aggregate(states: &[PowerState]) -> PowerState {
    let all = |state| states.iter().all(|s| *s == state);
    let any = |state| states.iter().any(|s| *s == state);

    if all(PowerState::Down) {
        PowerState::Down
    } else if all(PowerState::Up) {
        PowerState::Up
    } else if any(PowerState::GoingDown) {
        PowerState::GoingDown
    } else if any(PowerState::GoingUp) {
        PowerState::GoingUp
    } else {
        PowerState::GoingDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_state() {
        use PowerState::{Down, GoingDown, GoingUp, Up};

        assert_eq!(aggregate(&[]), Down);
        assert_eq!(aggregate(&[Down, Down]), Down);
        assert_eq!(aggregate(&[Up, Up, Up]), Up);
        assert_eq!(aggregate(&[Up, GoingUp, Down]), GoingUp);
        assert_eq!(aggregate(&[Up, GoingDown, GoingUp]), GoingDown);
        assert_eq!(aggregate(&[Up, Down]), GoingDown);
    }
}
