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

//! Distributed mutual-exclusion lock.
//!
//! A lock is a store key holding a token that is unique per acquisition.
//! Acquiring writes the key only if it is absent; extending and releasing
//! run as server-side scripts that check the token and mutate in one atomic
//! step. The only local state is the token of the lock currently held.

use std::{fmt, sync::Arc, time::Duration};

use derive_more::Display;
use futures::StreamExt;
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::{sync::broadcast, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wharf_common_store::{Store, Subscription};

use crate::{
    config::{LockConfig, TickerConfig},
    err::{AcquireCause, AcquireSnafu, CancelledSnafu, ExtendSnafu, LockError, ReleaseSnafu, StoreSnafu},
    metrics::{LOCK_ACQUIRED, LOCK_CONTENDED, LOCK_LOST, LOCK_TIMEOUTS},
    ticker::Ticker,
};

const EVENT_CAPACITY: usize = 32;

/// Result type for lock operations.
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Proof of ownership for one acquisition.
#[derive(Clone, PartialEq, Eq, Hash, Display, derive_more::Debug)]
#[debug("LockToken({_0})")]
#[display("{_0}")]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    resource_key: String,
    token:        LockToken,
    ttl:          Duration,
    acquired_at:  Instant,
}

impl Lock {
    pub fn resource_key(&self) -> &str { &self.resource_key }

    pub fn token(&self) -> &LockToken { &self.token }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn acquired_at(&self) -> Instant { self.acquired_at }
}

/// Ownership changes observed by a [`LockManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Acquired { key: String },
    Extended { key: String },
    Released { key: String },
    /// The lock expired or was taken over while this manager believed it held it.
    Lost { key: String },
}

struct LockInner {
    store:    Arc<dyn Store>,
    config:   LockConfig,
    held:     Mutex<Option<Lock>>,
    extender: Mutex<Option<Ticker>>,
    op:       tokio::sync::Mutex<()>,
    events:   broadcast::Sender<LockEvent>,
}

/// Distributed lock on one resource key.
///
/// Cloning yields another handle to the same manager. Operations issued
/// through one manager are serialized; different managers (or processes)
/// coordinate only through the store.
///
/// # Example
///
/// ```rust
/// use std::{sync::Arc, time::Duration};
///
/// use wharf_common_coord::{LockConfig, LockManager};
/// use wharf_common_store::MemoryStore;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(MemoryStore::new());
/// let config = LockConfig::builder()
///     .resource_key("job:1")
///     .ttl(Duration::from_secs(20))
///     .build();
///
/// let lock = LockManager::new(store, config);
/// lock.acquire_lock().await.unwrap();
/// lock.extend_lock().await.unwrap();
/// lock.release_lock().await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<LockInner>,
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>, config: LockConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        LockManager {
            inner: Arc::new(LockInner {
                store,
                config,
                held: Mutex::new(None),
                extender: Mutex::new(None),
                op: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &LockConfig { &self.inner.config }

    pub fn resource_key(&self) -> &str { self.inner.config.resource_key() }

    /// Whether this manager currently believes it holds the lock. The TTL may
    /// have lapsed since the last store round-trip.
    pub fn is_locked(&self) -> bool { self.inner.held.lock().is_some() }

    /// The lock currently held, if any.
    pub fn lock(&self) -> Option<Lock> { self.inner.held.lock().clone() }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> { self.inner.events.subscribe() }

    /// Acquires the lock, retrying per the configuration.
    pub async fn acquire_lock(&self) -> LockResult<Lock> {
        self.acquire_lock_until(&CancellationToken::new()).await
    }

    /// Acquires the lock, giving up with [`LockError::Cancelled`] once
    /// `cancel` fires. Cancellation is observed between attempts, never
    /// during a store round-trip.
    ///
    /// Calling this while already holding the lock confirms ownership by
    /// extending it; if the lock turns out to be lost, a fresh acquisition
    /// follows.
    pub async fn acquire_lock_until(&self, cancel: &CancellationToken) -> LockResult<Lock> {
        let _op = self.inner.op.lock().await;
        let inner = &self.inner;

        if inner.held.lock().is_some() {
            match inner.extend().await {
                Ok(lock) => return Ok(lock),
                Err(LockError::Extend { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let config = &inner.config;
        let key = config.resource_key();
        let token = LockToken::generate();
        let started = Instant::now();
        let deadline = started + config.max_retry_wait();
        let mut interval = config.retry_interval();
        let mut released: Option<Subscription> = None;

        loop {
            if cancel.is_cancelled() {
                return CancelledSnafu { key }.fail();
            }

            let acquired = inner
                .store
                .set_if_absent(key, token.as_str(), config.ttl())
                .await
                .context(StoreSnafu { key })?;
            if acquired {
                break;
            }

            LOCK_CONTENDED.inc();
            if !config.retry_enabled() {
                debug!(key, "Lock is held elsewhere");
                return AcquireSnafu {
                    key,
                    cause: AcquireCause::Contended,
                }
                .fail();
            }

            let now = Instant::now();
            if now >= deadline {
                LOCK_TIMEOUTS.inc();
                warn!(key, waited = ?(now - started), "Gave up waiting for lock");
                return AcquireSnafu {
                    key,
                    cause: AcquireCause::TimedOut {
                        waited: now - started,
                    },
                }
                .fail();
            }

            if released.is_none() {
                released = inner
                    .store
                    .subscribe(&release_channel(key))
                    .await
                    .inspect_err(|e| debug!(key, error = %e, "Polling without release notifications"))
                    .ok();
            }

            tokio::select! {
                () = cancel.cancelled() => return CancelledSnafu { key }.fail(),
                () = tokio::time::sleep_until((now + interval).min(deadline)) => {}
                () = next_release(&mut released) => debug!(key, "Lock released elsewhere, retrying"),
            }
            interval = config.backoff().next_interval(interval);
        }

        let lock = Lock {
            resource_key: key.to_owned(),
            token,
            ttl: config.ttl(),
            acquired_at: Instant::now(),
        };
        *inner.held.lock() = Some(lock.clone());
        LOCK_ACQUIRED.inc();
        info!(key, waited = ?started.elapsed(), "Lock acquired");
        inner.emit(LockEvent::Acquired {
            key: key.to_owned(),
        });

        if config.auto_extend() {
            self.start_extender();
        }
        Ok(lock)
    }

    /// Resets the TTL of the held lock.
    ///
    /// Fails with [`LockError::Extend`] if no lock is held or the stored token
    /// no longer matches (the lock expired and may belong to someone else).
    pub async fn extend_lock(&self) -> LockResult<Lock> {
        let _op = self.inner.op.lock().await;
        self.inner.extend().await
    }

    /// Deletes the lock if this manager still owns it.
    ///
    /// Fails with [`LockError::Release`] when nothing is held or the lock
    /// already expired. Another owner's lock is never deleted.
    pub async fn release_lock(&self) -> LockResult<()> {
        let _op = self.inner.op.lock().await;
        let inner = &self.inner;
        let key = inner.config.resource_key();

        let extender = inner.extender.lock().take();
        if let Some(extender) = extender {
            extender.stop().await;
        }

        let token = inner.held.lock().as_ref().map(|lock| lock.token.clone());
        let Some(token) = token else {
            return ReleaseSnafu { key }.fail();
        };

        let released = inner
            .store
            .compare_and_delete(key, token.as_str())
            .await
            .context(StoreSnafu { key })?;
        inner.forget(&token);

        if !released {
            inner.lost(key);
            return ReleaseSnafu { key }.fail();
        }

        info!(key, "Lock released");
        inner.emit(LockEvent::Released {
            key: key.to_owned(),
        });
        if let Err(e) = inner.store.publish(&release_channel(key), token.as_str()).await {
            warn!(key, error = %e, "Failed to announce lock release");
        }
        Ok(())
    }

    fn start_extender(&self) {
        let every = self.inner.config.extend_interval();
        let weak = Arc::downgrade(&self.inner);
        let scheduled = Ticker::schedule(TickerConfig::every(every), move |tick| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    tick.cancel();
                    return;
                };
                match inner.extend().await {
                    Ok(_) => {}
                    Err(LockError::Extend { .. }) => tick.cancel(),
                    Err(e) => warn!(
                        key = inner.config.resource_key(),
                        error = %e,
                        "Background lock refresh failed, retrying on next tick"
                    ),
                }
            }
        });

        match scheduled {
            Ok(ticker) => {
                // Replacing drops (and so cancels) any extender left from a lost lock.
                *self.inner.extender.lock() = Some(ticker);
            }
            Err(e) => warn!(key = self.resource_key(), error = %e, "Cannot start background lock refresh"),
        }
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("resource_key", &self.resource_key())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl LockInner {
    async fn extend(&self) -> LockResult<Lock> {
        let key = self.config.resource_key();
        let Some(mut lock) = self.held.lock().clone() else {
            return ExtendSnafu { key }.fail();
        };

        let extended = self
            .store
            .compare_and_expire(key, lock.token.as_str(), self.config.ttl())
            .await
            .context(StoreSnafu { key })?;
        if !extended {
            self.forget(&lock.token);
            self.lost(key);
            return ExtendSnafu { key }.fail();
        }

        lock.ttl = self.config.ttl();
        debug!(key, "Lock extended");
        self.emit(LockEvent::Extended {
            key: key.to_owned(),
        });
        Ok(lock)
    }

    /// Clears local state, unless a newer acquisition already replaced it.
    fn forget(&self, token: &LockToken) {
        let mut held = self.held.lock();
        if held.as_ref().is_some_and(|lock| lock.token == *token) {
            *held = None;
        }
    }

    fn lost(&self, key: &str) {
        LOCK_LOST.inc();
        warn!(key, "Lock is no longer held");
        self.emit(LockEvent::Lost {
            key: key.to_owned(),
        });
    }

    fn emit(&self, event: LockEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

fn release_channel(key: &str) -> String { format!("{key}:released") }

/// Resolves on the next release notice. Pends forever when there is no live
/// subscription, leaving the retry timer in charge.
async fn next_release(released: &mut Option<Subscription>) {
    if let Some(stream) = released.as_mut()
        && stream.next().await.is_some()
    {
        return;
    }
    *released = None;
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn release_channel_is_derived_from_key() {
        assert_eq!(release_channel("job:1"), "job:1:released");
    }
}
