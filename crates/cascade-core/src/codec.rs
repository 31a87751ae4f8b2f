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

//! JSON encoding of persisted records.
//!
//! Workflow headers and jobs are encoded independently. Decoding is
//! permissive: unknown top-level fields are ignored, so records written by a
//! newer engine remain readable.

use error_stack::ResultExt as _;

use crate::error::{CoreError, Result};
use crate::job::Job;
use crate::workflow::WorkflowHeader;

pub fn encode_workflow(header: &WorkflowHeader) -> Result<String> {
    serde_json::to_string(header).change_context(CoreError::Serialization)
}

pub fn decode_workflow(raw: &str) -> Result<WorkflowHeader> {
    serde_json::from_str(raw)
        .change_context(CoreError::Serialization)
        .attach_printable_lazy(|| format!("invalid workflow record: {raw:.120}"))
}

pub fn encode_job(job: &Job) -> Result<String> {
    serde_json::to_string(job).change_context(CoreError::Serialization)
}

pub fn decode_job(raw: &str) -> Result<Job> {
    serde_json::from_str(raw)
        .change_context(CoreError::Serialization)
        .attach_printable_lazy(|| format!("invalid job record: {raw:.120}"))
}
