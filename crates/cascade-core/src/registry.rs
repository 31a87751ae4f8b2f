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

//! Symbolic class resolution.
//!
//! Workflow and job classes are referenced by name in persisted records. The
//! registry maps those names back to behavior: a [`WorkflowDefinition`]
//! contributes the graph shape, a [`JobBehavior`] the `perform` body.
//! Registration happens once at engine construction; lookups of unregistered
//! workflow names surface as not-found to callers.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::dag::DagBuilder;
use crate::error::Result;
use crate::job::Job;

/// Everything a job's `perform` may observe.
pub struct PerformContext<'a> {
    pub workflow_id: &'a str,
    /// Constructor arguments captured when the workflow was created.
    pub arguments: &'a [serde_json::Value],
    /// The job being executed, with `payloads` populated from upstream
    /// outputs.
    pub job: &'a Job,
}

/// Error raised by user job code. The worker persists the failure and
/// re-raises it to the execution framework.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// User code for one job class.
pub trait JobBehavior: Send + Sync {
    fn perform<'a>(
        &'a self,
        ctx: PerformContext<'a>,
    ) -> BoxFuture<'a, std::result::Result<Option<serde_json::Value>, JobError>>;
}

/// The graph shape of one workflow class.
pub trait WorkflowDefinition: Send + Sync {
    /// Declare this workflow's jobs and edges. `arguments` are the
    /// constructor arguments the workflow was created (or reloaded) with.
    fn configure(&self, dag: &mut DagBuilder, arguments: &[serde_json::Value]) -> Result<()>;
}

impl<F> WorkflowDefinition for F
where
    F: Fn(&mut DagBuilder, &[serde_json::Value]) -> Result<()> + Send + Sync,
{
    fn configure(&self, dag: &mut DagBuilder, arguments: &[serde_json::Value]) -> Result<()> {
        self(dag, arguments)
    }
}

/// Name → behavior tables for workflow and job classes.
#[derive(Default)]
pub struct Registry {
    workflows: HashMap<String, Arc<dyn WorkflowDefinition>>,
    jobs: HashMap<String, Arc<dyn JobBehavior>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_workflow(
        &mut self,
        klass: impl Into<String>,
        definition: Arc<dyn WorkflowDefinition>,
    ) -> &mut Self {
        self.workflows.insert(klass.into(), definition);
        self
    }

    /// Register a workflow from a plain closure.
    pub fn register_workflow_fn<F>(&mut self, klass: impl Into<String>, configure: F) -> &mut Self
    where
        F: Fn(&mut DagBuilder, &[serde_json::Value]) -> Result<()> + Send + Sync + 'static,
    {
        self.register_workflow(klass, Arc::new(configure))
    }

    pub fn register_job(
        &mut self,
        klass: impl Into<String>,
        behavior: Arc<dyn JobBehavior>,
    ) -> &mut Self {
        self.jobs.insert(klass.into(), behavior);
        self
    }

    pub fn workflow(&self, klass: &str) -> Option<Arc<dyn WorkflowDefinition>> {
        self.workflows.get(klass).cloned()
    }

    pub fn job(&self, klass: &str) -> Option<Arc<dyn JobBehavior>> {
        self.jobs.get(klass).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}
