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

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::{sync::broadcast, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wharf_common_coord::{HookError, PowerError, PowerHooks, PowerManager, PowerState, Ticker};

use crate::{
    context::WorkerContext,
    id::WorkerId,
    metrics::{
        WORKER_ACTIVE, WORKER_RUN_DURATION_SECONDS, WORKER_RUN_ERRORS, WORKER_RUNS,
        WORKER_STARTED, WORKER_STOPPED,
    },
    worker::{Trigger, Worker},
};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle and fault notifications of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started { id: WorkerId },
    Stopped { id: WorkerId },
    /// `run()` returned an error. A fatal error also stops the schedule.
    RunFailed {
        id:      WorkerId,
        fatal:   bool,
        message: String,
    },
}

/// Handle to one worker. Cloning yields another handle to the same worker.
///
/// The worker starts `DOWN`. `up()` and `down()` follow [`PowerManager`]
/// semantics: concurrent calls share one transition and repeated calls are
/// no-ops once the target state is reached.
#[derive(Clone)]
pub struct WorkerHandle {
    id:     WorkerId,
    name:   &'static str,
    power:  PowerManager,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerHandle {
    pub fn new<W: Worker>(worker: W) -> Self {
        let id = WorkerId::new();
        let name = W::name();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let hooks = WorkerHooks {
            id,
            name,
            trigger: W::trigger(),
            worker: Arc::new(tokio::sync::Mutex::new(worker)),
            session: Mutex::new(None),
            events: events.clone(),
        };

        WorkerHandle {
            id,
            name,
            power: PowerManager::new(name, hooks),
            events,
        }
    }

    pub fn id(&self) -> WorkerId { self.id }

    pub fn name(&self) -> &'static str { self.name }

    pub fn state(&self) -> PowerState { self.power.state() }

    /// Runs `on_start()` and starts the trigger.
    pub async fn up(&self) -> Result<(), PowerError> { self.power.up().await }

    /// Stops the trigger, waits for an in-flight `run()` and runs
    /// `on_shutdown()`.
    pub async fn down(&self) -> Result<(), PowerError> { self.power.down().await }

    /// Subscribes to this worker's events, including faults raised by `run()`.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> { self.events.subscribe() }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// State of one up/down cycle.
struct Session {
    ctx:    WorkerContext,
    ticker: Option<Ticker>,
}

struct WorkerHooks<W> {
    id:      WorkerId,
    name:    &'static str,
    trigger: Trigger,
    worker:  Arc<tokio::sync::Mutex<W>>,
    session: Mutex<Option<Session>>,
    events:  broadcast::Sender<WorkerEvent>,
}

impl<W: Worker> WorkerHooks<W> {
    fn emit(&self, event: WorkerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn schedule(&self, ctx: &WorkerContext) -> Result<Ticker, HookError> {
        let worker = Arc::clone(&self.worker);
        let events = self.events.clone();
        let ctx = ctx.clone();
        let ticker = Ticker::schedule(self.trigger.ticker_config(), move |tick| {
            let worker = Arc::clone(&worker);
            let events = events.clone();
            let ctx = ctx.clone();
            async move {
                if ctx.is_cancelled() {
                    tick.cancel();
                    return;
                }
                let name = ctx.name();
                let start = Instant::now();
                let result = worker.lock().await.run(&ctx).await;
                WORKER_RUNS.with_label_values(&[name]).inc();
                WORKER_RUN_DURATION_SECONDS
                    .with_label_values(&[name])
                    .observe(start.elapsed().as_secs_f64());

                if let Err(e) = result {
                    WORKER_RUN_ERRORS.with_label_values(&[name]).inc();
                    if e.is_fatal() {
                        error!(worker = name, id = %ctx.id(), error = %e, "Worker run failed, stopping schedule");
                        tick.cancel();
                    } else {
                        warn!(worker = name, id = %ctx.id(), error = %e, "Worker run failed");
                    }
                    let _ = events.send(WorkerEvent::RunFailed {
                        id:      ctx.id(),
                        fatal:   e.is_fatal(),
                        message: e.to_string(),
                    });
                }
            }
        })?;
        Ok(ticker)
    }
}

#[async_trait::async_trait]
impl<W: Worker> PowerHooks for WorkerHooks<W> {
    async fn start_up(&self) -> Result<(), HookError> {
        let name = self.name;
        let ctx = WorkerContext::new(self.id, name, CancellationToken::new());

        info!(worker = name, id = %self.id, trigger = ?self.trigger, "Worker starting");
        self.worker.lock().await.on_start(&ctx).await?;

        let ticker = match self.schedule(&ctx) {
            Ok(ticker) => ticker,
            Err(e) => {
                if let Err(shutdown) = self.worker.lock().await.on_shutdown(&ctx).await {
                    warn!(worker = name, error = %shutdown, "Worker failed during on_shutdown");
                }
                return Err(e);
            }
        };
        *self.session.lock() = Some(Session {
            ctx,
            ticker: Some(ticker),
        });

        WORKER_STARTED.with_label_values(&[name]).inc();
        WORKER_ACTIVE.with_label_values(&[name]).inc();
        self.emit(WorkerEvent::Started { id: self.id });
        Ok(())
    }

    async fn shut_down(&self) -> Result<(), HookError> {
        let name = self.name;
        let session = self.session.lock().take();
        let Some(mut session) = session else {
            return Ok(());
        };

        info!(worker = name, id = %self.id, "Worker stopping");
        session.ctx.cancel();
        if let Some(ticker) = session.ticker.take() {
            ticker.stop().await;
            WORKER_ACTIVE.with_label_values(&[name]).dec();
        }

        if let Err(e) = self.worker.lock().await.on_shutdown(&session.ctx).await {
            error!(worker = name, id = %self.id, error = %e, "Worker failed during on_shutdown");
            // The next down() retries on_shutdown only.
            *self.session.lock() = Some(session);
            return Err(e.into());
        }

        WORKER_STOPPED.with_label_values(&[name]).inc();
        self.emit(WorkerEvent::Stopped { id: self.id });
        Ok(())
    }
}
