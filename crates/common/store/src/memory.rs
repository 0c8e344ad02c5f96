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
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures::StreamExt;
use parking_lot::Mutex;
use snafu::{OptionExt, ensure};
use tokio::{sync::broadcast, time::Instant};
use tracing::warn;

use crate::{
    Store, Subscription,
    error::{ConnectionSnafu, InvalidArgumentSnafu, Result, UnsupportedScriptSnafu},
    script::{COMPARE_AND_DELETE, COMPARE_AND_EXPIRE, Script, ttl_millis},
};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct Entry {
    value:      String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool { self.expires_at.is_none_or(|at| at > now) }
}

/// In-process [`Store`] with TTL expiry and pub/sub.
///
/// All operations run under one mutex, so every call (built-in scripts
/// included) is atomic with respect to every other call on the same
/// instance. Expiry is measured on the tokio clock, which makes TTLs
/// deterministic under a paused test runtime.
///
/// Share one instance behind an `Arc` to model several processes talking to
/// the same store endpoint.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries:  Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    offline:  AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Simulates losing (or regaining) the connection to the store. While
    /// offline every operation fails with a connectivity error.
    pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::Release); }

    /// Remaining time-to-live of `key`, if it exists and has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = Self::live_entry(&mut entries, key, now)?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn ensure_online(&self) -> Result<()> {
        ensure!(
            !self.offline.load(Ordering::Acquire),
            ConnectionSnafu {
                message: "memory store is offline",
            }
        );
        Ok(())
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if Self::live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value:      value.to_owned(),
                expires_at: Some(now + Duration::from_millis(ttl_millis(ttl))),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_online()?;
        let mut entries = self.entries.lock();
        Ok(Self::live_entry(&mut entries, key, Instant::now()).map(|entry| entry.value.clone()))
    }

    async fn eval(&self, script: &Script, keys: &[&str], args: &[String]) -> Result<i64> {
        self.ensure_online()?;
        script.check_arity(keys.len(), args.len())?;

        let now = Instant::now();
        let mut entries = self.entries.lock();
        match (script.name(), keys, args) {
            (name, [key], [expected]) if name == COMPARE_AND_DELETE.name() => {
                let owned = Self::live_entry(&mut entries, key, now)
                    .is_some_and(|entry| entry.value == *expected);
                if owned {
                    entries.remove(*key);
                }
                Ok(i64::from(owned))
            }
            (name, [key], [expected, ttl]) if name == COMPARE_AND_EXPIRE.name() => {
                let ttl_ms = ttl.parse::<u64>().ok().context(InvalidArgumentSnafu {
                    name,
                    value: ttl.clone(),
                })?;
                match Self::live_entry(&mut entries, key, now) {
                    Some(entry) if entry.value == *expected => {
                        entry.expires_at = Some(now + Duration::from_millis(ttl_ms.max(1)));
                        Ok(1)
                    }
                    _ => Ok(0),
                }
            }
            (name, ..) => UnsupportedScriptSnafu { name }.fail(),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize> {
        self.ensure_online()?;
        let channels = self.channels.lock();
        Ok(channels
            .get(channel)
            .map_or(0, |tx| tx.send(message.to_owned()).unwrap_or(0)))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.ensure_online()?;
        let rx = self
            .channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let channel = channel.to_owned();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
