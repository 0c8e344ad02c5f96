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

use std::{collections::HashMap, time::Duration};

use futures::StreamExt;
use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    Store, Subscription,
    error::{BackendSnafu, Result},
    script::{Script, ttl_millis},
};

/// [`Store`] backed by a single Redis endpoint.
///
/// Commands go over one multiplexed connection; each subscription opens its
/// own pub/sub connection. Scripts are sent with `EVALSHA` and loaded on
/// first use.
pub struct RedisStore {
    client:  redis::Client,
    conn:    redis::aio::MultiplexedConnection,
    scripts: Mutex<HashMap<&'static str, redis::Script>>,
}

impl RedisStore {
    /// Opens a connection to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .boxed()
            .context(BackendSnafu { command: "CONNECT" })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .boxed()
            .context(BackendSnafu { command: "CONNECT" })?;
        debug!(url, "Connected to redis");
        Ok(RedisStore {
            client,
            conn,
            scripts: Mutex::new(HashMap::new()),
        })
    }

    fn script(&self, script: &Script) -> redis::Script {
        self.scripts
            .lock()
            .entry(script.name())
            .or_insert_with(|| redis::Script::new(script.source()))
            .clone()
    }
}

#[async_trait::async_trait]
impl Store for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .boxed()
            .context(BackendSnafu { command: "SET" })?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .boxed()
            .context(BackendSnafu { command: "GET" })?;
        Ok(value)
    }

    async fn eval(&self, script: &Script, keys: &[&str], args: &[String]) -> Result<i64> {
        script.check_arity(keys.len(), args.len())?;
        let compiled = self.script(script);
        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        let mut conn = self.conn.clone();
        let reply: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .boxed()
            .context(BackendSnafu { command: "EVALSHA" })?;
        Ok(reply)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut conn)
            .await
            .boxed()
            .context(BackendSnafu { command: "PUBLISH" })?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .boxed()
            .context(BackendSnafu {
                command: "SUBSCRIBE",
            })?;
        pubsub
            .subscribe(channel)
            .await
            .boxed()
            .context(BackendSnafu {
                command: "SUBSCRIBE",
            })?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(stream.boxed())
    }
}
