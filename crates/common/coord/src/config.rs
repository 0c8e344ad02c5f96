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

use smart_default::SmartDefault;

/// Default lock time-to-live.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
/// Default pause between acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Default ceiling on the total time spent retrying an acquisition.
pub const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

const MIN_EXTEND_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Retry Backoff
// ============================================================================

/// How the pause between acquisition attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, SmartDefault)]
pub enum RetryBackoff {
    /// Every attempt waits `retry_interval`.
    #[default]
    Fixed,
    /// Each wait is the previous one times `factor`, capped at `max_interval`.
    Exponential { factor: f64, max_interval: Duration },
}

impl RetryBackoff {
    /// Computes the wait following a wait of `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        match *self {
            RetryBackoff::Fixed => current,
            RetryBackoff::Exponential {
                factor,
                max_interval,
            } => Duration::try_from_secs_f64(current.as_secs_f64() * factor.max(1.0))
                .unwrap_or(max_interval)
                .min(max_interval),
        }
    }
}

// ============================================================================
// Lock Config
// ============================================================================

/// Configuration for one [`LockManager`](crate::LockManager).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use wharf_common_coord::LockConfig;
///
/// let config = LockConfig::builder()
///     .resource_key("job:1")
///     .ttl(Duration::from_secs(20))
///     .retry_enabled(true)
///     .build();
/// assert_eq!(config.extend_interval(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct LockConfig {
    /// Key the lock is stored under.
    #[builder(into)]
    resource_key: String,

    #[builder(default = DEFAULT_LOCK_TTL)]
    ttl: Duration,

    /// Keep trying while the lock is held elsewhere instead of failing fast.
    #[builder(default)]
    retry_enabled: bool,

    #[builder(default = DEFAULT_RETRY_INTERVAL)]
    retry_interval: Duration,

    /// Upper bound on the time spent retrying before giving up.
    #[builder(default = DEFAULT_MAX_RETRY_WAIT)]
    max_retry_wait: Duration,

    #[builder(default)]
    backoff: RetryBackoff,

    /// Refresh the TTL in the background while the lock is held.
    #[builder(default)]
    auto_extend: bool,

    /// Period of background refreshes. Defaults to half the TTL.
    extend_interval: Option<Duration>,
}

impl LockConfig {
    pub fn resource_key(&self) -> &str { &self.resource_key }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn retry_enabled(&self) -> bool { self.retry_enabled }

    pub fn retry_interval(&self) -> Duration { self.retry_interval }

    pub fn max_retry_wait(&self) -> Duration { self.max_retry_wait }

    pub fn backoff(&self) -> RetryBackoff { self.backoff }

    pub fn auto_extend(&self) -> bool { self.auto_extend }

    pub fn extend_interval(&self) -> Duration {
        self.extend_interval
            .unwrap_or(self.ttl / 2)
            .max(MIN_EXTEND_INTERVAL)
    }

    /// Returns the same configuration with background refresh turned on.
    #[must_use]
    pub fn with_auto_extend(mut self) -> Self {
        self.auto_extend = true;
        self
    }
}

// ============================================================================
// Ticker Config
// ============================================================================

/// Schedule of a [`Ticker`](crate::Ticker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder)]
pub struct TickerConfig {
    interval: Duration,

    /// Fire every `interval` instead of once.
    #[builder(default = true)]
    repeating: bool,
}

impl TickerConfig {
    /// Fires at every multiple of `interval`.
    #[must_use]
    pub const fn every(interval: Duration) -> Self {
        TickerConfig {
            interval,
            repeating: true,
        }
    }

    /// Fires once, `delay` after scheduling.
    #[must_use]
    pub const fn after(delay: Duration) -> Self {
        TickerConfig {
            interval:  delay,
            repeating: false,
        }
    }

    pub const fn interval(&self) -> Duration { self.interval }

    pub const fn is_repeating(&self) -> bool { self.repeating }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_keeps_interval() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.next_interval(Duration::from_millis(250)), Duration::from_millis(250));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = RetryBackoff::Exponential {
            factor:       2.0,
            max_interval: Duration::from_secs(1),
        };
        let mut interval = Duration::from_millis(200);
        interval = backoff.next_interval(interval);
        assert_eq!(interval.as_millis(), 400);
        interval = backoff.next_interval(interval);
        assert_eq!(interval.as_millis(), 800);
        interval = backoff.next_interval(interval);
        assert_eq!(interval, Duration::from_secs(1));
    }

    #[test]
    fn lock_config_defaults() {
        let config = LockConfig::builder().resource_key("k").build();
        assert_eq!(config.ttl(), DEFAULT_LOCK_TTL);
        assert!(!config.retry_enabled());
        assert!(!config.auto_extend());
        assert_eq!(config.extend_interval(), DEFAULT_LOCK_TTL / 2);
        assert!(config.with_auto_extend().auto_extend());
    }

    #[test]
    fn ticker_config_builder_defaults_to_repeating() {
        let config = TickerConfig::builder().interval(Duration::from_millis(5)).build();
        assert_eq!(config, TickerConfig::every(Duration::from_millis(5)));
        assert!(!TickerConfig::after(Duration::from_millis(5)).is_repeating());
    }
}
