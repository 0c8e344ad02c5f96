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

use snafu::Snafu;

/// Result type for store round-trips.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Failures talking to the backing store.
///
/// These are infrastructure errors: they say nothing about who owns a key,
/// only that the store could not answer. Callers that retry on contention
/// usually want a different policy for these.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The store is unreachable or the connection dropped.
    #[snafu(display("Store connection failed: {message}"))]
    Connection {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    /// The driver reported an error while executing a command.
    #[snafu(display("Store command `{command}` failed"))]
    Backend {
        command: &'static str,
        source:  Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    /// The store cannot run the named script.
    #[snafu(display("Script `{name}` is not supported by this store"))]
    UnsupportedScript {
        name: &'static str,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// A script was called with the wrong number of keys or arguments.
    #[snafu(display("Script `{name}` expects {keys} key(s) and {args} argument(s)"))]
    ScriptArity {
        name: &'static str,
        keys: usize,
        args: usize,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// A script argument could not be interpreted.
    #[snafu(display("Script `{name}` got an invalid argument: {value}"))]
    InvalidArgument {
        name:  &'static str,
        value: String,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    /// The store answered with something the adapter did not expect.
    #[snafu(display("Unexpected reply to `{command}`: {reply}"))]
    UnexpectedReply {
        command: &'static str,
        reply:   String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },
}

impl StoreError {
    /// Returns `true` when the store itself was unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connection { .. } | StoreError::Backend { .. })
    }
}
