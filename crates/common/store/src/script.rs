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

//! Server-side scripts the coordination primitives rely on.
//!
//! Each script performs a check-then-act step as one atomic operation on the
//! store. Issuing the read and the write as two separate commands would let a
//! key expire and be re-acquired by another holder in between.

use std::time::Duration;

use snafu::ensure;

use crate::error::{Result, ScriptAritySnafu};

/// A named server-side script with a fixed key/argument arity.
///
/// `source` is Lua for Redis-compatible stores. Stores that cannot run Lua
/// recognise the built-in scripts by `name` and execute an equivalent atomic
/// operation natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Script {
    name:   &'static str,
    source: &'static str,
    keys:   usize,
    args:   usize,
}

impl Script {
    #[must_use]
    pub const fn new(name: &'static str, source: &'static str, keys: usize, args: usize) -> Self {
        Script {
            name,
            source,
            keys,
            args,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str { self.name }

    #[must_use]
    pub const fn source(&self) -> &'static str { self.source }

    /// Rejects calls whose key or argument count does not match the script.
    pub fn check_arity(&self, keys: usize, args: usize) -> Result<()> {
        ensure!(
            keys == self.keys && args == self.args,
            ScriptAritySnafu {
                name: self.name,
                keys: self.keys,
                args: self.args,
            }
        );
        Ok(())
    }
}

/// Deletes `KEYS[1]` only if its value equals `ARGV[1]`. Replies 1 on delete.
pub const COMPARE_AND_DELETE: Script = Script::new(
    "compare_and_delete",
    r#"if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end"#,
    1,
    1,
);

/// Resets the TTL of `KEYS[1]` to `ARGV[2]` milliseconds only if its value
/// equals `ARGV[1]`. Replies 1 on success.
pub const COMPARE_AND_EXPIRE: Script = Script::new(
    "compare_and_expire",
    r#"if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end"#,
    1,
    2,
);

/// Converts a TTL to whole milliseconds, never below one.
#[must_use]
pub fn ttl_millis(ttl: Duration) -> u64 { u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_mismatch_is_rejected() {
        assert!(COMPARE_AND_DELETE.check_arity(1, 1).is_ok());
        assert!(COMPARE_AND_DELETE.check_arity(2, 1).is_err());
        assert!(COMPARE_AND_EXPIRE.check_arity(1, 1).is_err());
    }

    #[test]
    fn ttl_is_clamped_to_one_millisecond() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(1500)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(20)), 20_000);
    }
}
