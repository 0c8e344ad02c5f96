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
use wharf_common_coord::LockConfig;

/// Default bound on how long a pool waits for its members to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, SmartDefault, bon::Builder)]
pub struct PoolConfig {
    /// Timeout for a member to confirm shutdown. Members not responding within
    /// this duration are reported as hung. Default: 30 seconds.
    #[default(DEFAULT_SHUTDOWN_TIMEOUT)]
    #[builder(default = DEFAULT_SHUTDOWN_TIMEOUT, into)]
    shutdown_timeout: Duration,

    /// Extra attempts to bring a member back down when rolling back a failed
    /// startup. Zero means a single best-effort attempt.
    #[builder(default)]
    rollback_retries: u32,
}

impl PoolConfig {
    pub fn shutdown_timeout(&self) -> Duration { self.shutdown_timeout }

    pub fn rollback_retries(&self) -> u32 { self.rollback_retries }
}

#[derive(Debug, Clone, bon::Builder)]
pub struct RunnerConfig {
    /// Lock that guards the pool. Background refresh is always enabled.
    lock: LockConfig,

    #[builder(default)]
    pool: PoolConfig,
}

impl RunnerConfig {
    pub fn lock(&self) -> LockConfig { self.lock.clone().with_auto_extend() }

    pub fn pool(&self) -> &PoolConfig { &self.pool }
}
