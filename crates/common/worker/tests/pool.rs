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
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use tokio::time::{Instant, sleep};
use wharf_common_coord::PowerState;
use wharf_common_worker::{
    MemberCause, PoolConfig, PoolError, PoolEvent, Trigger, WorkError, WorkResult, Worker,
    WorkerContext, WorkerHandle, WorkerPool,
};

#[derive(Default)]
struct Counters {
    starts:    AtomicU32,
    shutdowns: AtomicU32,
}

struct Steady {
    counters: Arc<Counters>,
}

#[async_trait::async_trait]
impl Worker for Steady {
    fn name() -> &'static str { "Steady" }

    fn trigger() -> Trigger { Trigger::Interval(Duration::from_millis(100)) }

    async fn on_start(&mut self, _ctx: &WorkerContext) -> WorkResult {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }

    async fn on_shutdown(&mut self, _ctx: &WorkerContext) -> WorkResult {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Broken;

#[async_trait::async_trait]
impl Worker for Broken {
    fn name() -> &'static str { "Broken" }

    fn trigger() -> Trigger { Trigger::Interval(Duration::from_millis(100)) }

    async fn on_start(&mut self, _ctx: &WorkerContext) -> WorkResult {
        sleep(Duration::from_millis(50)).await;
        Err(WorkError::fatal("database unreachable"))
    }

    async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }
}

/// Refuses to shut down a given number of times.
struct Stubborn {
    refusals: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl Worker for Stubborn {
    fn name() -> &'static str { "Stubborn" }

    fn trigger() -> Trigger { Trigger::Interval(Duration::from_millis(100)) }

    async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }

    async fn on_shutdown(&mut self, _ctx: &WorkerContext) -> WorkResult {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(WorkError::transient("still flushing"));
        }
        Ok(())
    }
}

struct Sluggish {
    start_time:    Duration,
    shutdown_time: Duration,
}

#[async_trait::async_trait]
impl Worker for Sluggish {
    fn name() -> &'static str { "Sluggish" }

    fn trigger() -> Trigger { Trigger::Interval(Duration::from_millis(100)) }

    async fn on_start(&mut self, _ctx: &WorkerContext) -> WorkResult {
        sleep(self.start_time).await;
        Ok(())
    }

    async fn run(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }

    async fn on_shutdown(&mut self, _ctx: &WorkerContext) -> WorkResult {
        sleep(self.shutdown_time).await;
        Ok(())
    }
}

fn steady() -> (WorkerHandle, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let handle = WorkerHandle::new(Steady {
        counters: Arc::clone(&counters),
    });
    (handle, counters)
}

fn stubborn(refusals: u32) -> WorkerHandle {
    WorkerHandle::new(Stubborn {
        refusals: Arc::new(AtomicU32::new(refusals)),
    })
}

#[tokio::test(start_paused = true)]
async fn test_pool_up_and_down() {
    let pool = WorkerPool::new(PoolConfig::default());
    let mut events = pool.subscribe();
    let (a, a_counters) = steady();
    let (b, b_counters) = steady();
    pool.add(a.clone()).unwrap();
    pool.add(b.clone()).unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.state(), PowerState::Down);

    pool.up().await.unwrap();
    assert_eq!(pool.state(), PowerState::Up);
    assert_eq!(a.state(), PowerState::Up);
    assert_eq!(b.state(), PowerState::Up);
    assert!(matches!(events.recv().await.unwrap(), PoolEvent::Up));

    // Already up.
    pool.up().await.unwrap();
    assert_eq!(a_counters.starts.load(Ordering::SeqCst), 1);

    pool.down().await.unwrap();
    assert_eq!(pool.state(), PowerState::Down);
    assert!(matches!(events.recv().await.unwrap(), PoolEvent::Down));
    assert_eq!(a_counters.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(b_counters.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_member_rolls_back_the_others() {
    let pool = WorkerPool::new(PoolConfig::default());
    let mut events = pool.subscribe();
    let (a, a_counters) = steady();
    let (b, b_counters) = steady();
    let broken = WorkerHandle::new(Broken);
    pool.add(a.clone()).unwrap();
    let broken_id = pool.add(broken.clone()).unwrap();
    pool.add(b.clone()).unwrap();

    let err = pool.up().await.unwrap_err();
    let PoolError::Startup {
        failures,
        rollback_failures,
        ..
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, broken_id);
    assert_eq!(failures[0].name, "Broken");
    assert!(matches!(failures[0].cause, MemberCause::Transition(_)));
    assert!(rollback_failures.is_empty());
    assert!(err.to_string().contains("Broken"));

    assert_eq!(pool.state(), PowerState::Down);
    for (member, counters) in [(&a, &a_counters), (&b, &b_counters)] {
        assert_eq!(member.state(), PowerState::Down);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }
    assert_eq!(broken.state(), PowerState::Down);

    assert!(matches!(
        events.recv().await.unwrap(),
        PoolEvent::StartupFailed { failures } if failures.len() == 1
    ));
    match events.recv().await.unwrap() {
        PoolEvent::RolledBack { members, failures } => {
            assert_eq!(members.len(), 2);
            assert!(members.contains(&a.id()) && members.contains(&b.id()));
            assert!(failures.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_best_effort_rollback_reports_refusals() {
    let pool = WorkerPool::new(PoolConfig::default());
    let holdout = stubborn(1);
    pool.add(holdout.clone()).unwrap();
    pool.add(WorkerHandle::new(Broken)).unwrap();

    let err = pool.up().await.unwrap_err();
    let PoolError::Startup {
        rollback_failures, ..
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(rollback_failures.len(), 1);
    assert_eq!(rollback_failures[0].id, holdout.id());

    // The holdout is still up, so the pool is not settled.
    assert_eq!(holdout.state(), PowerState::Up);
    assert_eq!(pool.state(), PowerState::GoingDown);

    pool.down().await.unwrap();
    assert_eq!(holdout.state(), PowerState::Down);
    assert_eq!(pool.state(), PowerState::Down);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_retries_refusals() {
    let pool = WorkerPool::new(PoolConfig::builder().rollback_retries(2).build());
    let holdout = stubborn(2);
    pool.add(holdout.clone()).unwrap();
    pool.add(WorkerHandle::new(Broken)).unwrap();

    let err = pool.up().await.unwrap_err();
    let PoolError::Startup {
        rollback_failures, ..
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert!(rollback_failures.is_empty());
    assert_eq!(holdout.state(), PowerState::Down);
    assert_eq!(pool.state(), PowerState::Down);
}

#[tokio::test(start_paused = true)]
async fn test_hung_member_is_reported() {
    let pool = WorkerPool::new(
        PoolConfig::builder()
            .shutdown_timeout(Duration::from_secs(1))
            .build(),
    );
    let mut events = pool.subscribe();
    let (fine, _) = steady();
    let hung = WorkerHandle::new(Sluggish {
        start_time:    Duration::ZERO,
        shutdown_time: Duration::from_secs(10),
    });
    pool.add(fine.clone()).unwrap();
    let hung_id = pool.add(hung.clone()).unwrap();
    pool.up().await.unwrap();
    let _up = events.recv().await.unwrap();

    let started = Instant::now();
    let err = pool.down().await.unwrap_err();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_millis(1100));

    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, hung_id);
    assert!(failures[0].is_hung());
    assert!(matches!(
        events.recv().await.unwrap(),
        PoolEvent::ShutdownFailed { failures } if failures.len() == 1
    ));

    assert_eq!(fine.state(), PowerState::Down);
    assert_eq!(hung.state(), PowerState::GoingDown);
    assert_eq!(pool.state(), PowerState::GoingDown);

    // The member keeps stopping on its own.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(hung.state(), PowerState::Down);
    assert_eq!(pool.state(), PowerState::Down);
}

#[tokio::test(start_paused = true)]
async fn test_add_requires_down_pool() {
    let pool = WorkerPool::new(PoolConfig::default());
    let (member, _) = steady();
    pool.add(member).unwrap();
    pool.up().await.unwrap();

    let (late, _) = steady();
    let err = pool.add(late).unwrap_err();
    assert!(matches!(err, PoolError::NotDown {
        state: PowerState::Up,
        ..
    }));
    assert_eq!(pool.len(), 1);

    pool.down().await.unwrap();
    let (late, _) = steady();
    pool.add(late).unwrap();
    assert_eq!(pool.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_add_during_pool_operation_is_rejected() {
    let pool = Arc::new(WorkerPool::new(PoolConfig::default()));
    pool.add(WorkerHandle::new(Sluggish {
        start_time:    Duration::from_secs(1),
        shutdown_time: Duration::ZERO,
    }))
    .unwrap();

    let starting = Arc::clone(&pool);
    let up = tokio::spawn(async move { starting.up().await });
    sleep(Duration::from_millis(10)).await;

    let (late, _) = steady();
    assert!(matches!(pool.add(late), Err(PoolError::Busy { .. })));

    up.await.unwrap().unwrap();
    pool.down().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remove_stops_only_the_target() {
    let pool = WorkerPool::new(PoolConfig::default());
    let (a, a_counters) = steady();
    let (b, b_counters) = steady();
    let a_id = pool.add(a.clone()).unwrap();
    pool.add(b.clone()).unwrap();
    pool.up().await.unwrap();

    let removed = pool.remove(a_id).await.unwrap();
    assert_eq!(removed.id(), a_id);
    assert_eq!(a.state(), PowerState::Down);
    assert_eq!(a_counters.shutdowns.load(Ordering::SeqCst), 1);

    assert_eq!(b.state(), PowerState::Up);
    assert_eq!(b_counters.shutdowns.load(Ordering::SeqCst), 0);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.state(), PowerState::Up);

    let err = pool.remove(a_id).await.unwrap_err();
    assert!(matches!(err, PoolError::UnknownMember { id, .. } if id == a_id));
}

#[tokio::test]
async fn test_empty_pool_stays_down() {
    let pool = WorkerPool::new(PoolConfig::default());
    pool.up().await.unwrap();
    assert!(pool.is_empty());
    assert_eq!(pool.state(), PowerState::Down);
    pool.down().await.unwrap();
}
