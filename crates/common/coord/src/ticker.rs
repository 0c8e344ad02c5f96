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
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use snafu::ensure;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::TickerConfig,
    err::{TickerError, ZeroIntervalSnafu},
    metrics::{TICKS_FIRED, TICKS_SKIPPED},
};

/// One firing of a [`Ticker`], handed to its callback.
#[derive(Debug, Clone)]
pub struct Tick {
    index:        u64,
    scheduled_at: Instant,
    cancel:       CancellationToken,
}

impl Tick {
    /// Multiple of the interval this tick was scheduled at, starting at 1.
    pub fn index(&self) -> u64 { self.index }

    /// Planned fire time, `origin + index * interval`.
    pub fn scheduled_at(&self) -> Instant { self.scheduled_at }

    /// Stops the ticker from inside its callback. No further tick fires.
    pub fn cancel(&self) { self.cancel.cancel(); }
}

#[derive(Debug, Default)]
struct TickCounts {
    fired:   AtomicU64,
    skipped: AtomicU64,
}

/// Drift-free periodic or one-shot scheduler.
///
/// Fire times are computed from a fixed origin as `origin + n * interval`,
/// never as "completion + interval", so callback latency does not accumulate.
/// Callbacks run one at a time: a tick that comes due while the previous
/// callback is still running is skipped, not queued.
///
/// Dropping a `Ticker` cancels it.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use wharf_common_coord::{Ticker, TickerConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let ticker = Ticker::schedule(TickerConfig::every(Duration::from_millis(100)), |tick| async move {
///     println!("tick {}", tick.index());
/// })
/// .unwrap();
///
/// tokio::time::sleep(Duration::from_secs(1)).await;
/// ticker.stop().await;
/// # }
/// ```
#[derive(Debug)]
pub struct Ticker {
    cancel: CancellationToken,
    counts: Arc<TickCounts>,
    task:   Option<JoinHandle<()>>,
}

impl Ticker {
    /// Starts ticking. The origin is the moment of this call.
    pub fn schedule<F, Fut>(config: TickerConfig, on_tick: F) -> Result<Self, TickerError>
    where
        F: FnMut(Tick) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ensure!(!config.interval().is_zero(), ZeroIntervalSnafu);

        let origin = Instant::now();
        let cancel = CancellationToken::new();
        let counts = Arc::new(TickCounts::default());
        let task = tokio::spawn(run(
            config,
            origin,
            on_tick,
            cancel.clone(),
            Arc::clone(&counts),
        ));

        Ok(Ticker {
            cancel,
            counts,
            task: Some(task),
        })
    }

    /// Stops further ticks. Idempotent. A callback already running is not
    /// interrupted, but no tick starts after this returns.
    pub fn cancel(&self) { self.cancel.cancel(); }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Returns `true` once the ticking task has exited.
    pub fn is_finished(&self) -> bool { self.task.as_ref().is_none_or(JoinHandle::is_finished) }

    /// Number of callbacks started so far.
    pub fn fired(&self) -> u64 { self.counts.fired.load(Ordering::Acquire) }

    /// Number of ticks skipped because a callback overran.
    pub fn skipped(&self) -> u64 { self.counts.skipped.load(Ordering::Acquire) }

    /// Cancels and waits for a running callback to return.
    ///
    /// Must not be awaited from inside this ticker's own callback; use
    /// [`Tick::cancel`] there.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!(error = ?e, "Ticker callback panicked");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) { self.cancel.cancel(); }
}

async fn run<F, Fut>(
    config: TickerConfig,
    origin: Instant,
    mut on_tick: F,
    cancel: CancellationToken,
    counts: Arc<TickCounts>,
) where
    F: FnMut(Tick) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = config.interval();
    let mut index = 1_u64;
    let mut next = origin + interval;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(next) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        counts.fired.fetch_add(1, Ordering::AcqRel);
        TICKS_FIRED.inc();
        on_tick(Tick {
            index,
            scheduled_at: next,
            cancel: cancel.clone(),
        })
        .await;

        if !config.is_repeating() || cancel.is_cancelled() {
            break;
        }

        index += 1;
        next += interval;
        let now = Instant::now();
        let mut skipped = 0_u64;
        while next < now {
            index += 1;
            next += interval;
            skipped += 1;
        }
        if skipped > 0 {
            debug!(skipped, "Tick callback overran its interval, skipping ticks");
            counts.skipped.fetch_add(skipped, Ordering::AcqRel);
            TICKS_SKIPPED.inc_by(skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let result = Ticker::schedule(TickerConfig::every(Duration::ZERO), |_| async {});
        assert!(matches!(result, Err(TickerError::ZeroInterval { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_ticker_cancels_it() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&fired);
        let ticker = Ticker::schedule(TickerConfig::every(Duration::from_millis(10)), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        drop(ticker);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
