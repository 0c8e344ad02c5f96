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

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{info, warn};
use wharf_common_coord::{
    HookError, LockEvent, LockManager, PowerHooks, PowerManager, PowerState, WeakPowerManager,
};
use wharf_common_store::Store;

use crate::{
    config::RunnerConfig,
    err::{LockSnafu, PoolSnafu, PowerSnafu, RunnerError},
    pool::WorkerPool,
};

/// Runs a [`WorkerPool`] in at most one process at a time.
///
/// Coming up acquires a distributed lock (refreshed in the background) and
/// then brings the pool up. Going down brings the pool down and releases the
/// lock. If the lock is lost while up, the runner brings itself down.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use wharf_common_coord::LockConfig;
/// use wharf_common_store::MemoryStore;
/// use wharf_common_worker::{RunnerConfig, WorkerRunner};
///
/// # #[tokio::main]
/// # async fn main() {
/// let config = RunnerConfig::builder()
///     .lock(LockConfig::builder().resource_key("runner:billing").build())
///     .build();
/// let runner = WorkerRunner::new("billing", Arc::new(MemoryStore::new()), config);
///
/// // runner.pool().add(...) while down
/// runner.up().await.unwrap();
/// runner.down().await.unwrap();
/// # }
/// ```
pub struct WorkerRunner {
    power: PowerManager,
    pool:  Arc<WorkerPool>,
    lock:  LockManager,
}

impl WorkerRunner {
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>, config: RunnerConfig) -> Self {
        let name = name.into();
        let pool = Arc::new(WorkerPool::new(config.pool().clone()));
        let lock = LockManager::new(store, config.lock());
        let this = Arc::new(OnceLock::new());

        let power = PowerManager::new(name.clone(), RunnerHooks {
            name,
            lock: lock.clone(),
            pool: Arc::clone(&pool),
            watcher: Mutex::new(None),
            this: Arc::clone(&this),
        });
        // Set once, right after creation, before any hook can run.
        let _ = this.set(power.downgrade());

        WorkerRunner { power, pool, lock }
    }

    pub fn name(&self) -> &str { self.power.name() }

    /// Pool run by this runner. Add members while the runner is down.
    pub fn pool(&self) -> &WorkerPool { &self.pool }

    pub fn lock(&self) -> &LockManager { &self.lock }

    pub fn state(&self) -> PowerState { self.power.state() }

    /// Acquires the lock and brings the pool up. If the pool fails to start,
    /// the lock is released again.
    pub async fn up(&self) -> Result<(), RunnerError> {
        self.power.up().await.context(PowerSnafu { name: self.name() })
    }

    /// Brings the pool down and releases the lock. If the pool fails to stop,
    /// the runner stays up and keeps the lock.
    pub async fn down(&self) -> Result<(), RunnerError> {
        self.power.down().await.context(PowerSnafu { name: self.name() })
    }
}

impl fmt::Debug for WorkerRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRunner")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("pool", &self.pool)
            .finish()
    }
}

struct RunnerHooks {
    name:    String,
    lock:    LockManager,
    pool:    Arc<WorkerPool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    this:    Arc<OnceLock<WeakPowerManager>>,
}

impl RunnerHooks {
    async fn release(&self) {
        if let Err(e) = self.lock.release_lock().await {
            warn!(runner = %self.name, error = %e, "Failed to release runner lock");
        }
    }

    fn watch(&self, mut events: broadcast::Receiver<LockEvent>) -> JoinHandle<()> {
        let name = self.name.clone();
        let this = self.this.get().cloned();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LockEvent::Lost { key }) => {
                        warn!(runner = %name, %key, "Runner lock lost, going down");
                        if let Some(power) = this.as_ref().and_then(WeakPowerManager::upgrade) {
                            // The shutdown hook aborts this task, so go down from a fresh one.
                            tokio::spawn(async move {
                                if let Err(e) = power.down().await {
                                    warn!(runner = power.name(), error = %e, "Runner failed to go down after losing its lock");
                                }
                            });
                        }
                        return;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl PowerHooks for RunnerHooks {
    async fn start_up(&self) -> Result<(), HookError> {
        let events = self.lock.subscribe();
        self.lock.acquire_lock().await.context(LockSnafu)?;

        if let Err(e) = self.pool.up().await.context(PoolSnafu) {
            self.release().await;
            return Err(e.into());
        }

        *self.watcher.lock() = Some(self.watch(events));
        info!(runner = %self.name, "Runner is up");
        Ok(())
    }

    async fn shut_down(&self) -> Result<(), HookError> {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        if let Err(e) = self.pool.down().await.context(PoolSnafu) {
            // Still up, so keep reacting to lock loss.
            *self.watcher.lock() = Some(self.watch(self.lock.subscribe()));
            return Err(e.into());
        }

        self.release().await;
        info!(runner = %self.name, "Runner is down");
        Ok(())
    }
}
