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

//! Coordination primitives for wharf workers.
//!
//! - [`LockManager`]: distributed mutual exclusion over a [`Store`](wharf_common_store::Store)
//!   key, with optional retry, auto-extension and release notifications.
//! - [`PowerManager`]: reentrant up/down lifecycle state machine.
//! - [`Ticker`]: drift-free periodic scheduler with skip-on-overlap.

mod config;
mod err;
mod lock;
mod metrics;
mod power;
mod ticker;

pub use crate::{
    config::{
        DEFAULT_LOCK_TTL, DEFAULT_MAX_RETRY_WAIT, DEFAULT_RETRY_INTERVAL, LockConfig, RetryBackoff,
        TickerConfig,
    },
    err::{AcquireCause, Direction, HookError, LockError, PowerError, TickerError},
    lock::{Lock, LockEvent, LockManager, LockResult, LockToken},
    power::{PowerHooks, PowerManager, PowerState, WeakPowerManager},
    ticker::{Tick, Ticker},
};
