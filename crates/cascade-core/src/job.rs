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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::name::JobName;
use crate::status::JobStatus;

/// An upstream job's output, collected by the worker before `perform` runs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPayload {
    pub id: String,
    pub klass: String,
    pub output: Option<serde_json::Value>,
}

/// A node of the workflow DAG.
///
/// The lifecycle timestamps are the authoritative state: status is derived
/// from which of them are set (see [`JobStatus`]). Each transition sets one
/// timestamp and requires the previous state, which makes replays and
/// concurrent observers safe: a transition attempted twice fails the second
/// time instead of rewinding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: JobName,
    pub klass: String,
    pub id: String,

    /// Queue this job is dispatched to; falls back to the engine namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Names of the jobs this one depends on.
    #[serde(default)]
    pub incoming: Vec<JobName>,

    /// Names of the jobs depending on this one.
    #[serde(default)]
    pub outgoing: Vec<JobName>,

    /// Upstream outputs, populated by the worker at execution time. Never
    /// persisted.
    #[serde(skip)]
    pub payloads: Vec<JobPayload>,

    /// Value returned by the job's `perform`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_payload: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(klass: impl Into<String>, id: impl Into<String>) -> Self {
        let klass = klass.into();
        let id = id.into();
        Self {
            name: JobName::new(klass.clone(), id.clone()),
            klass,
            id,
            queue: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            payloads: Vec::new(),
            output_payload: None,
            enqueued_at: None,
            started_at: None,
            finished_at: None,
            failed_at: None,
        }
    }

    /// Derive the current status from the lifecycle timestamps.
    pub fn status(&self) -> JobStatus {
        if self.failed_at.is_some() {
            JobStatus::Failed
        } else if self.finished_at.is_some() {
            JobStatus::Succeeded
        } else if self.started_at.is_some() {
            JobStatus::Running
        } else if self.enqueued_at.is_some() {
            JobStatus::Enqueued
        } else {
            JobStatus::Pending
        }
    }

    pub fn pending(&self) -> bool {
        self.status() == JobStatus::Pending
    }

    pub fn enqueued(&self) -> bool {
        self.status() == JobStatus::Enqueued
    }

    pub fn running(&self) -> bool {
        self.status() == JobStatus::Running
    }

    pub fn succeeded(&self) -> bool {
        self.status() == JobStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.status() == JobStatus::Failed
    }

    /// Terminal in either direction.
    pub fn finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Mark the job as handed to the background queue. Requires `Pending`.
    pub fn enqueue(&mut self) -> Result<()> {
        match self.status() {
            JobStatus::Pending => {
                self.enqueued_at = Some(Utc::now());
                Ok(())
            }
            status => Err(error_stack::report!(CoreError::InvalidTransition {
                attempted: "enqueue",
                status,
            })),
        }
    }

    /// Mark the job as picked up by a worker.
    ///
    /// `Pending` is accepted alongside `Enqueued`: some executors deliver a
    /// job before the enqueue flag's persist is visible to the worker.
    pub fn start(&mut self) -> Result<()> {
        match self.status() {
            JobStatus::Pending | JobStatus::Enqueued => {
                self.started_at = Some(Utc::now());
                Ok(())
            }
            status => Err(error_stack::report!(CoreError::InvalidTransition {
                attempted: "start",
                status,
            })),
        }
    }

    /// Mark the job as succeeded. Requires `Running`.
    pub fn finish(&mut self) -> Result<()> {
        match self.status() {
            JobStatus::Running => {
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            status => Err(error_stack::report!(CoreError::InvalidTransition {
                attempted: "finish",
                status,
            })),
        }
    }

    /// Mark the job as failed. Requires `Running`.
    pub fn fail(&mut self) -> Result<()> {
        match self.status() {
            JobStatus::Running => {
                self.failed_at = Some(Utc::now());
                Ok(())
            }
            status => Err(error_stack::report!(CoreError::InvalidTransition {
                attempted: "fail",
                status,
            })),
        }
    }

    /// Whether this job may be enqueued, given its upstream jobs.
    ///
    /// True iff the job is pending and every upstream job has succeeded. The
    /// caller supplies the upstream snapshots; readiness is always evaluated
    /// against freshly loaded state by the orchestration layer.
    pub fn ready_to_start<'a, I>(&self, upstream: I) -> bool
    where
        I: IntoIterator<Item = &'a Job>,
    {
        self.pending() && upstream.into_iter().all(Job::succeeded)
    }
}
