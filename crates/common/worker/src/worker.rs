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

use std::time::Duration;

use wharf_common_coord::TickerConfig;

use crate::{context::WorkerContext, err::WorkResult};

/// Schedule on which a running worker's `run()` fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Execute at every multiple of the interval after the worker comes up.
    /// A run still in progress when the next one is due makes that one skip.
    Interval(Duration),
    /// Execute once, the given delay after the worker comes up.
    After(Duration),
}

impl Trigger {
    pub(crate) fn ticker_config(self) -> TickerConfig {
        match self {
            Trigger::Interval(interval) => TickerConfig::every(interval),
            Trigger::After(delay) => TickerConfig::after(delay),
        }
    }
}

/// Core worker trait for background tasks.
///
/// Implementors only define the single-shot body in `run()`. Bringing the
/// worker up runs `on_start()` and then starts the trigger; bringing it down
/// stops the trigger, waits for an in-flight `run()` and calls
/// `on_shutdown()`.
#[async_trait::async_trait]
pub trait Worker: Send + 'static {
    /// Worker name for logging and metrics.
    fn name() -> &'static str
    where
        Self: Sized;

    /// Execution trigger strategy.
    fn trigger() -> Trigger
    where
        Self: Sized;

    /// Called each time the worker comes up, before the first `run()`.
    /// Returning `Err` fails the startup.
    async fn on_start(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }

    /// Single execution unit, called each time the trigger fires.
    ///
    /// Transient errors are reported and the schedule continues. Fatal errors
    /// are reported and no further run happens until the worker is brought
    /// down and up again.
    async fn run(&mut self, ctx: &WorkerContext) -> WorkResult;

    /// Called each time the worker goes down, after the last `run()`
    /// returned. Returning `Err` fails the shutdown.
    async fn on_shutdown(&mut self, _ctx: &WorkerContext) -> WorkResult { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_maps_to_ticker_schedule() {
        let every = Trigger::Interval(Duration::from_secs(1)).ticker_config();
        assert!(every.is_repeating());
        assert_eq!(every.interval(), Duration::from_secs(1));

        let once = Trigger::After(Duration::from_millis(5)).ticker_config();
        assert!(!once.is_repeating());
        assert_eq!(once.interval(), Duration::from_millis(5));
    }
}
