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

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::name::{JobName, JobSelector};

/// The persisted workflow record. Jobs are not embedded; they live in
/// per-class hashes keyed by the workflow id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHeader {
    pub id: String,
    pub klass: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<String>,
}

/// External observer record attached to a workflow at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub monitorable_type: String,
    pub monitorable_id: String,
}

/// A named DAG of jobs, persisted as a single aggregate.
///
/// In-memory instances are snapshots of store state: mutation is local until
/// the client persists it again, and `persisted` tracks whether this
/// snapshot has been written. The store owns the authoritative state.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub klass: String,
    pub arguments: Vec<serde_json::Value>,
    pub jobs: Vec<Job>,
    pub stopped: bool,
    pub linked_type: Option<String>,
    pub linked_id: Option<String>,

    /// Snapshot durability bit; never persisted.
    pub persisted: bool,
    /// Observer attached by the monitor loader; never persisted.
    pub monitor: Option<Monitor>,
}

impl Workflow {
    pub fn new(
        id: impl Into<String>,
        klass: impl Into<String>,
        arguments: Vec<serde_json::Value>,
        jobs: Vec<Job>,
    ) -> Self {
        Self {
            id: id.into(),
            klass: klass.into(),
            arguments,
            jobs,
            stopped: false,
            linked_type: None,
            linked_id: None,
            persisted: false,
            monitor: None,
        }
    }

    /// Reassemble a snapshot from a decoded header and its job records.
    pub fn from_parts(header: WorkflowHeader, jobs: Vec<Job>) -> Self {
        Self {
            id: header.id,
            klass: header.klass,
            arguments: header.arguments,
            jobs,
            stopped: header.stopped,
            linked_type: header.linked_type,
            linked_id: header.linked_id,
            persisted: false,
            monitor: None,
        }
    }

    /// The persisted header record for this snapshot.
    pub fn header(&self) -> WorkflowHeader {
        WorkflowHeader {
            id: self.id.clone(),
            klass: self.klass.clone(),
            arguments: self.arguments.clone(),
            stopped: self.stopped,
            linked_type: self.linked_type.clone(),
            linked_id: self.linked_id.clone(),
        }
    }

    /// Look up a job by exact name.
    pub fn job(&self, name: &JobName) -> Option<&Job> {
        self.jobs.iter().find(|job| &job.name == name)
    }

    /// Look up the first job matching the selector, in declaration order.
    pub fn find_job(&self, selector: &JobSelector) -> Option<&Job> {
        self.jobs.iter().find(|job| selector.matches(&job.name))
    }

    pub fn find_job_mut(&mut self, selector: &JobSelector) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| selector.matches(&job.name))
    }

    /// Jobs with no incoming edges; the set enqueued by an unrestricted
    /// start.
    pub fn initial_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|job| job.incoming.is_empty())
    }

    /// The distinct job classes in this workflow, in declaration order.
    pub fn job_klasses(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.jobs
            .iter()
            .map(|job| job.klass.as_str())
            .filter(|klass| seen.insert(*klass))
            .collect()
    }

    pub fn mark_as_started(&mut self) {
        self.stopped = false;
        self.persisted = false;
    }

    pub fn mark_as_stopped(&mut self) {
        self.stopped = true;
        self.persisted = false;
    }

    /// Attach a linked external record reference.
    pub fn link(&mut self, linked_type: impl Into<String>, linked_id: impl Into<String>) {
        self.linked_type = Some(linked_type.into());
        self.linked_id = Some(linked_id.into());
    }

    /// Whether the named job may be enqueued: it is pending and every
    /// upstream job in this snapshot has succeeded. Unknown names and
    /// dangling edges are never ready.
    pub fn ready_to_start(&self, name: &JobName) -> bool {
        let Some(job) = self.job(name) else {
            return false;
        };
        if !job.pending() {
            return false;
        }
        job.incoming.iter().all(|upstream| {
            self.job(upstream).is_some_and(Job::succeeded)
        })
    }

    /// Whether the workflow has run to completion.
    ///
    /// A pending job below a failure can never become ready, so requiring
    /// every job to be terminal would keep such workflows alive (and
    /// unexpired) forever. The definition used here: every job is succeeded,
    /// failed, or pending with a failed transitive upstream. Enqueued or
    /// running jobs always mean "not finished".
    pub fn finished(&self) -> bool {
        let doomed = self.doomed();
        self.jobs.iter().all(|job| {
            job.finished() || (job.pending() && doomed.contains(&job.name))
        })
    }

    /// Names of jobs downstream of a failed job.
    fn doomed(&self) -> HashSet<JobName> {
        let mut doomed: HashSet<JobName> = HashSet::new();
        let mut frontier: Vec<&Job> =
            self.jobs.iter().filter(|job| job.failed()).collect();

        while let Some(job) = frontier.pop() {
            for name in &job.outgoing {
                if doomed.insert(name.clone()) {
                    if let Some(next) = self.job(name) {
                        frontier.push(next);
                    }
                }
            }
        }

        doomed
    }
}

// Snapshot equality ignores the transient fields (`persisted`, `monitor`),
// so a freshly loaded workflow compares equal to the instance that was
// persisted.
impl PartialEq for Workflow {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.klass == other.klass
            && self.arguments == other.arguments
            && self.jobs == other.jobs
            && self.stopped == other.stopped
            && self.linked_type == other.linked_type
            && self.linked_id == other.linked_id
    }
}
