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

//! Workers, worker pools and lock-guarded runners.
//!
//! - [`Worker`]: trait defining the task body and its lifecycle hooks
//! - [`WorkerHandle`]: one worker with an up/down lifecycle, driving `run()`
//!   on a drift-free [`Trigger`]
//! - [`WorkerPool`]: starts and stops many workers as a unit, rolling back a
//!   partially failed startup and reporting hung members on shutdown
//! - [`WorkerRunner`]: a pool guarded by a distributed lock, so only one
//!   process runs it at a time
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use wharf_common_worker::{
//!     PoolConfig, Trigger, WorkResult, Worker, WorkerContext, WorkerHandle, WorkerPool,
//! };
//!
//! struct Heartbeat;
//!
//! #[async_trait::async_trait]
//! impl Worker for Heartbeat {
//!     fn name() -> &'static str { "heartbeat" }
//!
//!     fn trigger() -> Trigger { Trigger::Interval(Duration::from_secs(5)) }
//!
//!     async fn run(&mut self, ctx: &WorkerContext) -> WorkResult {
//!         println!("{} is alive", ctx.name());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::new(PoolConfig::default());
//!     pool.add(WorkerHandle::new(Heartbeat)).unwrap();
//!
//!     pool.up().await.unwrap();
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     pool.down().await.unwrap();
//! }
//! ```

mod config;
mod context;
mod err;
mod handle;
mod id;
mod metrics;
mod pool;
mod runner;
mod worker;

pub use config::{DEFAULT_SHUTDOWN_TIMEOUT, PoolConfig, RunnerConfig};
pub use context::WorkerContext;
pub use err::{
    ErrorSeverity, MemberCause, MemberFailure, PoolError, RunnerError, WorkError, WorkResult,
};
pub use handle::{WorkerEvent, WorkerHandle};
pub use id::WorkerId;
pub use pool::{PoolEvent, WorkerPool};
pub use runner::WorkerRunner;
pub use worker::{Trigger, Worker};
