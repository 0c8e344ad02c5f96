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

use tokio::time::sleep;
use wharf_common_coord::{LockConfig, PowerError, PowerState};
use wharf_common_store::{MemoryStore, Store};
use wharf_common_worker::{
    RunnerConfig, RunnerError, Trigger, WorkError, WorkResult, Worker, WorkerContext,
    WorkerHandle, WorkerRunner,
};

const KEY: &str = "runner:test";

struct Idle;

#[async_trait::async_trait]
impl Worker for Idle {
    fn name() -> &'static str { "Idle" }

    fn trigger() -> Trigger { Trigger::Interval(Duration::from_millis(100)) }

    async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }
}

struct Broken;

#[async_trait::async_trait]
impl Worker for Broken {
    fn name() -> &'static str { "Broken" }

    fn trigger() -> Trigger { Trigger::Interval(Duration::from_millis(100)) }

    async fn on_start(&mut self, _ctx: &WorkerContext) -> WorkResult {
        Err(WorkError::fatal("misconfigured"))
    }

    async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }
}

fn runner(store: &Arc<MemoryStore>, name: &str) -> (WorkerRunner, WorkerHandle) {
    let config = RunnerConfig::builder()
        .lock(
            LockConfig::builder()
                .resource_key(KEY)
                .ttl(Duration::from_secs(2))
                .build(),
        )
        .build();
    let runner = WorkerRunner::new(name, Arc::clone(store) as Arc<dyn Store>, config);
    let member = WorkerHandle::new(Idle);
    runner.pool().add(member.clone()).unwrap();
    (runner, member)
}

#[tokio::test(start_paused = true)]
async fn test_only_one_runner_comes_up() {
    let store = Arc::new(MemoryStore::new());
    let (first, first_member) = runner(&store, "first");
    let (second, second_member) = runner(&store, "second");

    first.up().await.unwrap();
    assert_eq!(first.state(), PowerState::Up);
    assert_eq!(first_member.state(), PowerState::Up);
    assert!(first.lock().is_locked());

    let err = second.up().await.unwrap_err();
    assert!(matches!(err, RunnerError::Power {
        source: PowerError::Transition { .. },
        ..
    }));
    assert_eq!(second.state(), PowerState::Down);
    assert_eq!(second_member.state(), PowerState::Down);

    // The auto-extended lock outlives its TTL.
    sleep(Duration::from_secs(10)).await;
    assert!(first.lock().is_locked());
    assert!(second.up().await.is_err());

    first.down().await.unwrap();
    assert_eq!(first_member.state(), PowerState::Down);
    assert!(store.get(KEY).await.unwrap().is_none());

    second.up().await.unwrap();
    assert_eq!(second_member.state(), PowerState::Up);
    second.down().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pool_failure_releases_lock() {
    let store = Arc::new(MemoryStore::new());
    let (runner, member) = runner(&store, "runner");
    runner.pool().add(WorkerHandle::new(Broken)).unwrap();

    assert!(runner.up().await.is_err());
    assert_eq!(runner.state(), PowerState::Down);
    assert_eq!(member.state(), PowerState::Down);
    assert!(!runner.lock().is_locked());
    assert!(store.get(KEY).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lost_lock_brings_runner_down() {
    let store = Arc::new(MemoryStore::new());
    let (runner, member) = runner(&store, "runner");
    runner.up().await.unwrap();

    // Someone else takes the key behind the runner's back.
    let token = runner.lock().lock().unwrap().token().clone();
    assert!(store.compare_and_delete(KEY, token.as_str()).await.unwrap());
    assert!(
        store
            .set_if_absent(KEY, "thief", Duration::from_secs(60))
            .await
            .unwrap()
    );

    sleep(Duration::from_secs(3)).await;
    assert_eq!(runner.state(), PowerState::Down);
    assert_eq!(member.state(), PowerState::Down);
    assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some("thief"));
}
