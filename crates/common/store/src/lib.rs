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

//! Store adapter for wharf coordination primitives.
//!
//! The coordination layer never talks to a database directly. It consumes the
//! handful of atomic operations declared by [`Store`]:
//!
//! - set-if-absent with a TTL
//! - compare-and-delete and compare-and-reset-TTL, both run as scripts
//! - generic atomic script execution
//! - publish/subscribe for cross-process signalling
//!
//! Two implementations ship with the crate: [`MemoryStore`], an in-process
//! store that honours TTLs on the tokio clock, and `RedisStore` behind the
//! `redis` feature.

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod script;

use std::time::Duration;

use futures::stream::BoxStream;

pub use crate::{
    error::{Result, StoreError},
    memory::MemoryStore,
    script::{COMPARE_AND_DELETE, COMPARE_AND_EXPIRE, Script, ttl_millis},
};
#[cfg(feature = "redis")]
pub use crate::redis_store::RedisStore;

/// Stream of payloads published on one channel.
pub type Subscription = BoxStream<'static, String>;

/// Atomic key/value operations required by the coordination primitives.
///
/// Every method is one round-trip and is atomic on the store side. Lock
/// correctness assumes a single authoritative store endpoint.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Stores `value` under `key` with `ttl` if the key does not exist.
    /// Returns `true` if the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Runs `script` atomically and returns its integer reply.
    async fn eval(&self, script: &Script, keys: &[&str], args: &[String]) -> Result<i64>;

    /// Deletes `key` if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let reply = self
            .eval(&COMPARE_AND_DELETE, &[key], &[expected.to_owned()])
            .await?;
        Ok(reply == 1)
    }

    /// Resets the TTL of `key` if it currently holds `expected`.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let args = [expected.to_owned(), ttl_millis(ttl).to_string()];
        let reply = self.eval(&COMPARE_AND_EXPIRE, &[key], &args).await?;
        Ok(reply == 1)
    }

    /// Publishes `message` on `channel`, returning how many subscribers got it.
    async fn publish(&self, channel: &str, message: &str) -> Result<usize>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
