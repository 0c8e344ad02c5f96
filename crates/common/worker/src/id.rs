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

//! Unique identifier for workers.

use derive_more::{Debug, Display};
use uuid::Uuid;

/// Unique identifier for a worker.
///
/// Every [`WorkerHandle`](crate::WorkerHandle) receives a fresh `WorkerId`.
/// Pools use it to report failing members and to remove a member
/// individually:
///
/// ```rust,no_run
/// # use std::time::Duration;
/// # use wharf_common_worker::{PoolConfig, Trigger, WorkResult, Worker, WorkerContext, WorkerHandle, WorkerPool};
/// # struct MyWorker;
/// # #[async_trait::async_trait]
/// # impl Worker for MyWorker {
/// #     fn name() -> &'static str { "my-worker" }
/// #     fn trigger() -> Trigger { Trigger::Interval(Duration::from_secs(5)) }
/// #     async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }
/// # }
/// # #[tokio::main]
/// # async fn main() {
/// let pool = WorkerPool::new(PoolConfig::default());
/// let id = pool.add(WorkerHandle::new(MyWorker)).unwrap();
///
/// pool.up().await.unwrap();
/// pool.remove(id).await.unwrap();
/// # }
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[debug("WorkerId({_0})")]
#[display("{_0}")]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub(crate) fn new() -> Self { Self(Uuid::new_v4()) }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid { &self.0 }
}
