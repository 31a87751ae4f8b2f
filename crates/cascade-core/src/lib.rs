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

//! Core data model for Cascade workflows.
//!
//! A workflow is a directed acyclic graph of jobs. This crate holds the pure
//! parts of the engine:
//!
//! - [`Job`] and its lifecycle state machine
//! - [`Workflow`] - the aggregate, its topology, and the finished/readiness
//!   predicates
//! - [`DagBuilder`] - declaration and validation of the graph shape
//! - [`Registry`] - symbolic class name resolution for workflow and job
//!   variants
//! - [`codec`] - the JSON encoding of persisted records
//!
//! Everything here is local and I/O free; persistence and orchestration live
//! in `cascade-execution`.

pub mod codec;
pub mod dag;
mod error;
pub mod job;
pub mod name;
pub mod registry;
pub mod status;
pub mod workflow;

pub use dag::{DagBuilder, JobOpts, JobTemplate};
pub use error::{CoreError, Result};
pub use job::{Job, JobPayload};
pub use name::{JobName, JobSelector};
pub use registry::{
    JobBehavior, JobError, PerformContext, Registry, WorkflowDefinition,
};
pub use status::JobStatus;
pub use workflow::{Monitor, Workflow, WorkflowHeader};
