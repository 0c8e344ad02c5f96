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

//! Reentrant lifecycle state machine.
//!
//! A [`PowerManager`] moves its owner through
//! `DOWN -> GOING_UP -> UP -> GOING_DOWN -> DOWN`. Requests that arrive while
//! a transition is in flight are parked in a FIFO queue per direction and
//! resolved together when the transition settles, so concurrent callers
//! share one hook invocation and observe the same outcome.

use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
};

use derive_more::Display;
use futures::FutureExt;
use parking_lot::Mutex;
use snafu::IntoError;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    err::{Direction, HookError, InterruptedSnafu, PowerError, TransitionSnafu},
    metrics::POWER_TRANSITIONS,
};

/// Lifecycle state of a power-managed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PowerState {
    #[display("DOWN")]
    Down,
    #[display("GOING_UP")]
    GoingUp,
    #[display("UP")]
    Up,
    #[display("GOING_DOWN")]
    GoingDown,
}

impl Direction {
    const fn transient_state(self) -> PowerState {
        match self {
            Direction::Up => PowerState::GoingUp,
            Direction::Down => PowerState::GoingDown,
        }
    }

    const fn settled_state(self) -> PowerState {
        match self {
            Direction::Up => PowerState::Up,
            Direction::Down => PowerState::Down,
        }
    }
}

/// Startup and shutdown logic of the component that owns a [`PowerManager`].
///
/// At most one of these runs at a time per manager. Once started, a hook runs
/// to completion even if every caller stops waiting; hooks handle their own
/// internal cancellation.
#[async_trait::async_trait]
pub trait PowerHooks: Send + Sync + 'static {
    async fn start_up(&self) -> Result<(), HookError>;

    async fn shut_down(&self) -> Result<(), HookError>;
}

type Waiter = oneshot::Sender<Result<(), PowerError>>;

struct Inner {
    state:      PowerState,
    going_up:   Vec<Waiter>,
    going_down: Vec<Waiter>,
}

impl Inner {
    fn waiters(&mut self, direction: Direction) -> &mut Vec<Waiter> {
        match direction {
            Direction::Up => &mut self.going_up,
            Direction::Down => &mut self.going_down,
        }
    }
}

struct Shared {
    name:  String,
    hooks: Box<dyn PowerHooks>,
    inner: Mutex<Inner>,
}

/// Serializes `up()`/`down()` requests for one component.
///
/// `up()` on an `UP` component and `down()` on a `DOWN` component return
/// immediately. A request that matches the transition in flight joins it. A
/// request for the opposite direction waits for the transition in flight to
/// settle and then runs its own hook.
///
/// # Example
///
/// ```rust
/// use wharf_common_coord::{HookError, PowerHooks, PowerManager, PowerState};
///
/// struct Server;
///
/// #[async_trait::async_trait]
/// impl PowerHooks for Server {
///     async fn start_up(&self) -> Result<(), HookError> { Ok(()) }
///
///     async fn shut_down(&self) -> Result<(), HookError> { Ok(()) }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let power = PowerManager::new("server", Server);
/// power.up().await.unwrap();
/// assert_eq!(power.state(), PowerState::Up);
/// # }
/// ```
#[derive(Clone)]
pub struct PowerManager {
    shared: Arc<Shared>,
}

impl PowerManager {
    pub fn new(name: impl Into<String>, hooks: impl PowerHooks) -> Self {
        PowerManager {
            shared: Arc::new(Shared {
                name:  name.into(),
                hooks: Box::new(hooks),
                inner: Mutex::new(Inner {
                    state:      PowerState::Down,
                    going_up:   Vec::new(),
                    going_down: Vec::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str { &self.shared.name }

    pub fn state(&self) -> PowerState { self.shared.inner.lock().state }

    pub fn is_up(&self) -> bool { self.state() == PowerState::Up }

    pub fn is_down(&self) -> bool { self.state() == PowerState::Down }

    /// Brings the component up, resolving once it is `UP` or the startup
    /// hook failed.
    pub async fn up(&self) -> Result<(), PowerError> { self.request(Direction::Up).await }

    /// Brings the component down, resolving once it is `DOWN` or the shutdown
    /// hook failed.
    pub async fn down(&self) -> Result<(), PowerError> { self.request(Direction::Down).await }

    /// Non-owning reference, for hooks that need to drive their own manager.
    pub fn downgrade(&self) -> WeakPowerManager {
        WeakPowerManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    async fn request(&self, direction: Direction) -> Result<(), PowerError> {
        let rx = {
            let mut inner = self.shared.inner.lock();
            if inner.state == direction.settled_state() {
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters(direction).push(tx);
            if inner.state == direction.opposite().settled_state() {
                inner.state = direction.transient_state();
                tokio::spawn(Arc::clone(&self.shared).drive(direction));
            }
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => InterruptedSnafu {
                name: self.shared.name.clone(),
            }
            .fail(),
        }
    }
}

impl fmt::Debug for PowerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerManager")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Weak counterpart of [`PowerManager`].
#[derive(Clone)]
pub struct WeakPowerManager {
    shared: Weak<Shared>,
}

impl WeakPowerManager {
    pub fn upgrade(&self) -> Option<PowerManager> {
        self.shared.upgrade().map(|shared| PowerManager { shared })
    }
}

impl fmt::Debug for WeakPowerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("WeakPowerManager") }
}

impl Shared {
    async fn run_hook(&self, direction: Direction) -> Result<(), HookError> {
        let hook = match direction {
            Direction::Up => self.hooks.start_up(),
            Direction::Down => self.hooks.shut_down(),
        };
        match AssertUnwindSafe(hook).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        }
    }

    /// Runs transitions until no request for the opposite direction is
    /// pending. Lives on its own task so a transition always completes.
    async fn drive(self: Arc<Self>, mut direction: Direction) {
        loop {
            debug!(component = %self.name, %direction, "Power transition started");
            let result = self.run_hook(direction).await;

            let (waiters, satisfied, next) = {
                let mut inner = self.inner.lock();
                let waiters = std::mem::take(inner.waiters(direction));
                let opposite = direction.opposite();
                if result.is_ok() {
                    inner.state = direction.settled_state();
                    if inner.waiters(opposite).is_empty() {
                        (waiters, Vec::new(), None)
                    } else {
                        inner.state = opposite.transient_state();
                        (waiters, Vec::new(), Some(opposite))
                    }
                } else {
                    // Reverting lands on the state the opposite requests asked for.
                    inner.state = opposite.settled_state();
                    let satisfied = std::mem::take(inner.waiters(opposite));
                    (waiters, satisfied, None)
                }
            };

            let outcome = if result.is_ok() { "ok" } else { "failed" };
            POWER_TRANSITIONS
                .with_label_values(&[self.name.as_str(), direction.as_str(), outcome])
                .inc();

            let result = result.map_err(|source| {
                warn!(component = %self.name, %direction, error = %source, "Power transition failed");
                TransitionSnafu {
                    name: self.name.clone(),
                    direction,
                }
                .into_error(Arc::from(source))
            });
            if result.is_ok() {
                info!(component = %self.name, state = %direction.settled_state(), "Power transition complete");
            }

            for waiter in waiters {
                // A caller that stopped waiting has nothing to be told.
                let _ = waiter.send(result.clone());
            }
            for waiter in satisfied {
                let _ = waiter.send(Ok(()));
            }

            match next {
                Some(opposite) => direction = opposite,
                None => break,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(
            || "hook panicked".to_owned(),
            |message| format!("hook panicked: {message}"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let message: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(message.as_ref()), "hook panicked: boom");

        let message: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(message.as_ref()), "hook panicked: bang");

        let message: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(message.as_ref()), "hook panicked");
    }

    #[test]
    fn states_display_in_upper_case() {
        assert_eq!(PowerState::GoingDown.to_string(), "GOING_DOWN");
        assert_eq!(Direction::Up.transient_state(), PowerState::GoingUp);
        assert_eq!(Direction::Down.settled_state(), PowerState::Down);
    }
}
