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

use crate::status::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown workflow class: {klass}")]
    UnknownWorkflowClass { klass: String },

    #[error("unknown job class: {klass}")]
    UnknownJobClass { klass: String },

    #[error("dependency on undeclared job class: {reference}")]
    UnknownDependency { reference: String },

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("cannot {attempted} a job that is {status}")]
    InvalidTransition {
        attempted: &'static str,
        status: JobStatus,
    },

    #[error("malformed job name: {name:?}")]
    MalformedJobName { name: String },

    #[error("serialization error")]
    Serialization,
}

pub type Result<T, E = error_stack::Report<CoreError>> = std::result::Result<T, E>;
