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

//! Store keyspace layout.
//!
//! | Key | Type | Value |
//! |---|---|---|
//! | `workflows:<uuid>` | string | encoded workflow header |
//! | `jobs:<wfid>:<klass>` | hash | field = job uuid, value = encoded job |
//!
//! Successor-locks live under `enqueue_outgoing:<wfid>:<successor_name>`.

use cascade_core::JobName;

const WORKFLOW_PREFIX: &str = "workflows:";

/// All workflow header keys.
pub const WORKFLOWS_PATTERN: &str = "workflows:*";

pub fn workflow(id: &str) -> String {
    format!("{WORKFLOW_PREFIX}{id}")
}

pub fn jobs(workflow_id: &str, klass: &str) -> String {
    format!("jobs:{workflow_id}:{klass}")
}

/// All per-class job hashes of one workflow.
pub fn jobs_pattern(workflow_id: &str) -> String {
    format!("jobs:{workflow_id}:*")
}

/// The advisory lock serializing "check ready then enqueue" for one
/// successor.
pub fn successor_lock(workflow_id: &str, successor: &JobName) -> String {
    format!("enqueue_outgoing:{workflow_id}:{successor}")
}

/// The workflow id embedded in a header key, if it is one.
pub fn workflow_id(key: &str) -> Option<&str> {
    key.strip_prefix(WORKFLOW_PREFIX)
}
