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

use tokio_util::sync::CancellationToken;

use crate::id::WorkerId;

/// Context passed to every hook of one worker run.
///
/// A fresh context is created each time the worker comes up and cancelled
/// when it starts going down.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    id:           WorkerId,
    name:         &'static str,
    cancel_token: CancellationToken,
}

impl WorkerContext {
    pub(crate) fn new(id: WorkerId, name: &'static str, cancel_token: CancellationToken) -> Self {
        WorkerContext {
            id,
            name,
            cancel_token,
        }
    }

    pub fn id(&self) -> WorkerId { self.id }

    pub fn name(&self) -> &'static str { self.name }

    /// Check if the worker has started going down.
    pub fn is_cancelled(&self) -> bool { self.cancel_token.is_cancelled() }

    /// Wait for the worker to start going down.
    pub async fn cancelled(&self) { self.cancel_token.cancelled().await }

    /// Get a child cancellation token for sub-tasks.
    pub fn child_token(&self) -> CancellationToken { self.cancel_token.child_token() }

    pub(crate) fn cancel(&self) { self.cancel_token.cancel(); }
}
