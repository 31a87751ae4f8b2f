// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// The payload the background queue delivers back to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub workflow_id: String,
    /// Canonical `"<klass>|<id>"` job name.
    pub job_name: String,
}

impl JobEnvelope {
    pub fn new(workflow_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            job_name: job_name.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to hand the job to the background queue")]
pub struct EnqueueError;

/// The engine's view of the background execution framework.
///
/// The framework owns retries, scheduling delays, and worker dispatch; the
/// engine only pushes envelopes. Delivery is at-least-once; the worker
/// runtime is written to tolerate replays.
pub trait Enqueuer: Send + Sync {
    fn enqueue<'a>(
        &'a self,
        queue: &'a str,
        delay: Duration,
        envelope: JobEnvelope,
    ) -> BoxFuture<'a, Result<(), error_stack::Report<EnqueueError>>>;
}
