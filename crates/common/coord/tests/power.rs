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
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::sleep;
use wharf_common_coord::{Direction, HookError, PowerError, PowerHooks, PowerManager, PowerState};

#[derive(Default)]
struct Recorder {
    ups:       AtomicU32,
    downs:     AtomicU32,
    log:       Mutex<Vec<&'static str>>,
    fail_up:   AtomicBool,
    panic_up:  AtomicBool,
    fail_down: AtomicBool,
}

struct Hooks {
    recorder: Arc<Recorder>,
    delay:    Duration,
}

#[async_trait::async_trait]
impl PowerHooks for Hooks {
    async fn start_up(&self) -> Result<(), HookError> {
        let recorder = &self.recorder;
        recorder.ups.fetch_add(1, Ordering::SeqCst);
        recorder.log.lock().push("up:begin");
        sleep(self.delay).await;
        recorder.log.lock().push("up:end");
        if recorder.panic_up.load(Ordering::SeqCst) {
            panic!("start_up exploded");
        }
        if recorder.fail_up.load(Ordering::SeqCst) {
            return Err("start_up refused".into());
        }
        Ok(())
    }

    async fn shut_down(&self) -> Result<(), HookError> {
        let recorder = &self.recorder;
        recorder.downs.fetch_add(1, Ordering::SeqCst);
        recorder.log.lock().push("down:begin");
        sleep(self.delay).await;
        recorder.log.lock().push("down:end");
        if recorder.fail_down.load(Ordering::SeqCst) {
            return Err("shut_down refused".into());
        }
        Ok(())
    }
}

fn power(delay: Duration) -> (PowerManager, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let power = PowerManager::new("test", Hooks {
        recorder: Arc::clone(&recorder),
        delay,
    });
    (power, recorder)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ups_share_one_hook_call() {
    let (power, recorder) = power(Duration::from_millis(100));

    let results = futures::future::join_all((0..8).map(|_| power.up())).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(recorder.ups.load(Ordering::SeqCst), 1);
    assert_eq!(power.state(), PowerState::Up);
}

#[tokio::test(start_paused = true)]
async fn test_settled_requests_return_immediately() {
    let (power, recorder) = power(Duration::from_millis(100));

    power.down().await.unwrap();
    assert_eq!(recorder.downs.load(Ordering::SeqCst), 0);

    power.up().await.unwrap();
    power.up().await.unwrap();
    assert_eq!(recorder.ups.load(Ordering::SeqCst), 1);

    power.down().await.unwrap();
    power.down().await.unwrap();
    assert_eq!(recorder.downs.load(Ordering::SeqCst), 1);
    assert!(power.is_down());
}

#[tokio::test(start_paused = true)]
async fn test_state_is_transient_during_hook() {
    let (power, _recorder) = power(Duration::from_millis(100));

    let observer = power.clone();
    let (result, observed) = tokio::join!(power.up(), async move {
        sleep(Duration::from_millis(50)).await;
        observer.state()
    });
    result.unwrap();
    assert_eq!(observed, PowerState::GoingUp);
}

#[tokio::test(start_paused = true)]
async fn test_failed_startup_reverts_and_reports_to_all() {
    let (power, recorder) = power(Duration::from_millis(50));
    recorder.fail_up.store(true, Ordering::SeqCst);

    let results = futures::future::join_all((0..3).map(|_| power.up())).await;
    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert!(matches!(err, PowerError::Transition {
            direction: Direction::Up,
            ..
        }));
    }
    assert_eq!(recorder.ups.load(Ordering::SeqCst), 1);
    assert_eq!(power.state(), PowerState::Down);

    recorder.fail_up.store(false, Ordering::SeqCst);
    power.up().await.unwrap();
    assert_eq!(recorder.ups.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_shutdown_stays_up() {
    let (power, recorder) = power(Duration::from_millis(10));
    power.up().await.unwrap();

    recorder.fail_down.store(true, Ordering::SeqCst);
    let err = power.down().await.unwrap_err();
    assert!(matches!(err, PowerError::Transition {
        direction: Direction::Down,
        ..
    }));
    assert_eq!(power.state(), PowerState::Up);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_hook_is_a_failed_transition() {
    let (power, recorder) = power(Duration::from_millis(10));
    recorder.panic_up.store(true, Ordering::SeqCst);

    let err = power.up().await.unwrap_err();
    assert!(err.to_string().contains("failed to go up"));
    assert_eq!(power.state(), PowerState::Down);
}

#[tokio::test(start_paused = true)]
async fn test_down_during_startup_runs_after_it() {
    let (power, recorder) = power(Duration::from_millis(100));

    let (up, down) = tokio::join!(power.up(), async {
        sleep(Duration::from_millis(10)).await;
        power.down().await
    });
    up.unwrap();
    down.unwrap();

    assert_eq!(power.state(), PowerState::Down);
    assert_eq!(*recorder.log.lock(), vec![
        "up:begin",
        "up:end",
        "down:begin",
        "down:end"
    ]);
}

#[tokio::test(start_paused = true)]
async fn test_pending_down_resolves_when_startup_fails() {
    let (power, recorder) = power(Duration::from_millis(100));
    recorder.fail_up.store(true, Ordering::SeqCst);

    let (up, down) = tokio::join!(power.up(), async {
        sleep(Duration::from_millis(10)).await;
        power.down().await
    });
    assert!(up.is_err());
    down.unwrap();
    assert_eq!(recorder.downs.load(Ordering::SeqCst), 0);
    assert_eq!(power.state(), PowerState::Down);
}

#[tokio::test(start_paused = true)]
async fn test_transition_completes_after_caller_gives_up() {
    let (power, recorder) = power(Duration::from_millis(100));

    let abandoned = tokio::time::timeout(Duration::from_millis(10), power.up()).await;
    assert!(abandoned.is_err());
    assert_eq!(power.state(), PowerState::GoingUp);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(power.state(), PowerState::Up);
    assert_eq!(recorder.ups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_weak_reference_does_not_keep_manager_alive() {
    let (power, _recorder) = power(Duration::ZERO);
    let weak = power.downgrade();
    assert!(weak.upgrade().is_some());
    drop(power);
    assert!(weak.upgrade().is_none());
}
