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

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Unknown workflow class name, or no persisted workflow under the id.
    #[error("workflow not found: {name}")]
    WorkflowNotFound { name: String },

    /// The worker was handed a job that no longer exists. Client-side
    /// lookups return an absent value instead.
    #[error("job '{name}' not found in workflow {workflow_id}")]
    JobNotFound { workflow_id: String, name: String },

    /// User `perform` code raised; the failure is persisted before this
    /// surfaces to the execution framework.
    #[error("job '{name}' of workflow {workflow_id} failed")]
    JobFailed { workflow_id: String, name: String },

    #[error("error accessing the store")]
    State,

    #[error("error encoding or decoding a persisted record")]
    Serialization,

    #[error("error dispatching to the background queue")]
    Enqueue,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type Result<T, E = error_stack::Report<ExecutionError>> = std::result::Result<T, E>;
