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

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use error_stack::ResultExt as _;
use futures::stream::BoxStream;
use futures::{StreamExt as _, TryStreamExt as _};

use cascade_core::{codec, dag, DagBuilder, Job, JobName, JobSelector, Registry, Workflow};
use cascade_state::Store;

use crate::config::EngineConfig;
use crate::enqueuer::{Enqueuer, JobEnvelope};
use crate::error::{ExecutionError, Result};
use crate::hooks::{LinkedRecordProbe, MonitorLoader, NoLinkedRecords, NoopMonitorLoader};
use crate::{ids, keys};

fn workflow_not_found(name: &str) -> error_stack::Report<ExecutionError> {
    error_stack::report!(ExecutionError::WorkflowNotFound {
        name: name.to_string(),
    })
}

/// Orchestrator over persisted workflows.
///
/// The store owns the authoritative state; workflows and jobs returned here
/// are snapshots, durable again once re-persisted. The client is cheap to
/// clone; every worker holds one.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    enqueuer: Arc<dyn Enqueuer>,
    config: EngineConfig,
    monitors: Arc<dyn MonitorLoader>,
    linked_records: Arc<dyn LinkedRecordProbe>,
}

impl Client {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<Registry>,
        enqueuer: Arc<dyn Enqueuer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            enqueuer,
            config,
            monitors: Arc::new(NoopMonitorLoader),
            linked_records: Arc::new(NoLinkedRecords),
        }
    }

    pub fn with_monitor_loader(mut self, monitors: Arc<dyn MonitorLoader>) -> Self {
        self.monitors = monitors;
        self
    }

    pub fn with_linked_record_probe(mut self, probe: Arc<dyn LinkedRecordProbe>) -> Self {
        self.linked_records = probe;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn enqueuer(&self) -> &Arc<dyn Enqueuer> {
        &self.enqueuer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build an unpersisted workflow of the named class.
    ///
    /// The class's definition declares the jobs and edges; ids are assigned
    /// against the store and the graph is validated for consistency and
    /// acyclicity.
    pub async fn create_workflow(
        &self,
        name: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<Workflow> {
        let definition = self
            .registry
            .workflow(name)
            .ok_or_else(|| workflow_not_found(name))?;

        let mut builder = DagBuilder::new();
        definition
            .configure(&mut builder, &arguments)
            .change_context(ExecutionError::internal("invalid workflow definition"))?;
        let templates = builder
            .build()
            .change_context(ExecutionError::internal("invalid workflow definition"))?;

        let workflow_id = ids::next_workflow_id(self.store.as_ref()).await?;
        let mut job_ids = Vec::with_capacity(templates.len());
        for template in &templates {
            job_ids
                .push(ids::next_job_id(self.store.as_ref(), &workflow_id, &template.klass).await?);
        }
        let jobs = dag::instantiate(&templates, &job_ids);

        tracing::debug!(
            workflow_id = %workflow_id,
            klass = name,
            jobs = jobs.len(),
            "workflow created"
        );
        Ok(Workflow::new(workflow_id, name, arguments, jobs))
    }

    /// Mark the workflow started, persist it, and enqueue its entry set:
    /// the initial jobs, or the subset named by `only`.
    ///
    /// Unknown names in `only` are skipped; lookups of jobs never raise.
    pub async fn start_workflow(&self, workflow: &mut Workflow, only: &[&str]) -> Result<()> {
        workflow.mark_as_started();
        self.persist_workflow(workflow).await?;
        tracing::info!(workflow_id = %workflow.id, klass = %workflow.klass, "workflow started");

        let targets: Vec<JobName> = if only.is_empty() {
            workflow.initial_jobs().map(|job| job.name.clone()).collect()
        } else {
            only.iter()
                .filter_map(|raw| {
                    let selector = JobSelector::parse(raw);
                    let found = workflow.find_job(&selector).map(|job| job.name.clone());
                    if found.is_none() {
                        tracing::warn!(
                            workflow_id = %workflow.id,
                            job = *raw,
                            "selective start names an unknown job; skipping"
                        );
                    }
                    found
                })
                .collect()
        };

        for name in targets {
            let selector = JobSelector::Exact(name);
            let Some(job) = workflow.find_job(&selector) else {
                continue;
            };
            let mut job = job.clone();
            self.enqueue_job(workflow, &mut job).await?;
            if let Some(slot) = workflow.find_job_mut(&selector) {
                *slot = job;
            }
        }
        Ok(())
    }

    /// Soft-cancel: workers already running continue, but nothing further
    /// is enqueued for this workflow.
    pub async fn stop_workflow(&self, id: &str) -> Result<Workflow> {
        let mut workflow = self.find_workflow(id).await?;
        workflow.mark_as_stopped();
        self.persist_workflow(&mut workflow).await?;
        tracing::info!(workflow_id = %workflow.id, "workflow stopped");
        Ok(workflow)
    }

    /// Load a workflow snapshot: header, every job record, and the optional
    /// monitor.
    ///
    /// Reconstruction goes through the registered definition so the jobs
    /// come back in the declared shape, then the persisted records replace
    /// the defaults.
    pub async fn find_workflow(&self, id: &str) -> Result<Workflow> {
        let raw = self
            .store
            .get(&keys::workflow(id))
            .await
            .change_context(ExecutionError::State)?
            .ok_or_else(|| workflow_not_found(id))?;
        let header = codec::decode_workflow(&raw).change_context(ExecutionError::Serialization)?;

        let definition = self
            .registry
            .workflow(&header.klass)
            .ok_or_else(|| workflow_not_found(&header.klass))?;
        let mut builder = DagBuilder::new();
        definition
            .configure(&mut builder, &header.arguments)
            .change_context(ExecutionError::internal("invalid workflow definition"))?;
        let templates = builder
            .build()
            .change_context(ExecutionError::internal("invalid workflow definition"))?;

        // one hash load per distinct class, sorted for a stable deal order
        let mut pools: HashMap<String, VecDeque<Job>> = HashMap::new();
        let mut klass_order: Vec<String> = Vec::new();
        for template in &templates {
            if pools.contains_key(&template.klass) {
                continue;
            }
            let raw_jobs = self
                .store
                .hvals(&keys::jobs(id, &template.klass))
                .await
                .change_context(ExecutionError::State)?;
            let mut decoded = raw_jobs
                .iter()
                .map(|raw| codec::decode_job(raw))
                .collect::<cascade_core::Result<Vec<Job>>>()
                .change_context(ExecutionError::Serialization)?;
            decoded.sort_by(|a, b| a.id.cmp(&b.id));
            pools.insert(template.klass.clone(), decoded.into());
            klass_order.push(template.klass.clone());
        }

        // replace the definition's default jobs with the persisted records,
        // keeping the declared order
        let mut jobs = Vec::new();
        for template in &templates {
            if let Some(pool) = pools.get_mut(&template.klass) {
                if let Some(job) = pool.pop_front() {
                    jobs.push(job);
                }
            }
        }
        for klass in &klass_order {
            if let Some(pool) = pools.get_mut(klass) {
                jobs.extend(pool.drain(..));
            }
        }

        let mut workflow = Workflow::from_parts(header, jobs);
        workflow.persisted = true;

        if let Some(monitor) = self.monitors.load_for(&workflow).await {
            workflow.link(
                monitor.monitorable_type.clone(),
                monitor.monitorable_id.clone(),
            );
            workflow.monitor = Some(monitor);
        }

        Ok(workflow)
    }

    /// Write the header and every job record; the snapshot is durable again
    /// afterwards.
    pub async fn persist_workflow(&self, workflow: &mut Workflow) -> Result<()> {
        let encoded =
            codec::encode_workflow(&workflow.header()).change_context(ExecutionError::Serialization)?;
        self.store
            .set(&keys::workflow(&workflow.id), &encoded)
            .await
            .change_context(ExecutionError::State)?;

        for job in &workflow.jobs {
            self.persist_job(&workflow.id, job).await?;
        }

        workflow.persisted = true;
        tracing::debug!(workflow_id = %workflow.id, "workflow persisted");
        Ok(())
    }

    pub async fn persist_job(&self, workflow_id: &str, job: &Job) -> Result<()> {
        let encoded = codec::encode_job(job).change_context(ExecutionError::Serialization)?;
        self.store
            .hset(&keys::jobs(workflow_id, &job.klass), &job.id, &encoded)
            .await
            .change_context(ExecutionError::State)
    }

    /// Look up one job record. `name` is `"<klass>"` (first job of that
    /// class) or `"<klass>|<id>"` (exact). Absence is `None`, never an
    /// error.
    pub async fn find_job(&self, workflow_id: &str, name: &str) -> Result<Option<Job>> {
        let selector = JobSelector::parse(name);
        let key = keys::jobs(workflow_id, selector.klass());
        let raw = match &selector {
            JobSelector::Exact(exact) => self
                .store
                .hget(&key, exact.id())
                .await
                .change_context(ExecutionError::State)?,
            JobSelector::Klass(_) => self
                .store
                .hscan(&key)
                .await
                .change_context(ExecutionError::State)?
                .into_iter()
                .next()
                .map(|(_, value)| value),
        };
        match raw {
            Some(raw) => Ok(Some(
                codec::decode_job(&raw).change_context(ExecutionError::Serialization)?,
            )),
            None => Ok(None),
        }
    }

    /// Delete the header and every per-class job hash.
    pub async fn destroy_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.store
            .del(&keys::workflow(&workflow.id))
            .await
            .change_context(ExecutionError::State)?;
        for klass in workflow.job_klasses() {
            self.store
                .del(&keys::jobs(&workflow.id, klass))
                .await
                .change_context(ExecutionError::State)?;
        }
        tracing::info!(workflow_id = %workflow.id, "workflow destroyed");
        Ok(())
    }

    /// Apply a TTL to the header and every per-class job hash.
    pub async fn expire_workflow(&self, workflow: &Workflow, ttl: Duration) -> Result<()> {
        self.store
            .expire(&keys::workflow(&workflow.id), ttl)
            .await
            .change_context(ExecutionError::State)?;
        for klass in workflow.job_klasses() {
            self.store
                .expire(&keys::jobs(&workflow.id, klass), ttl)
                .await
                .change_context(ExecutionError::State)?;
        }
        Ok(())
    }

    /// Flag the job enqueued, persist it, and dispatch it to the background
    /// queue.
    ///
    /// Returns `false` without enqueueing when the workflow is stopped. The
    /// caller must hold a fresh snapshot: the worker re-reads the workflow
    /// under the successor-lock before calling this, which is what makes
    /// the stop check and the once-only enqueue race-tight.
    pub async fn enqueue_job(&self, workflow: &Workflow, job: &mut Job) -> Result<bool> {
        if workflow.stopped {
            tracing::debug!(
                workflow_id = %workflow.id,
                job = %job.name,
                "workflow stopped; not enqueueing"
            );
            return Ok(false);
        }

        job.enqueue()
            .change_context(ExecutionError::internal("job is not enqueueable"))?;
        self.persist_job(&workflow.id, job).await?;

        let queue = job
            .queue
            .clone()
            .unwrap_or_else(|| self.config.namespace.clone());
        self.enqueuer
            .enqueue(
                &queue,
                self.config.job_delay,
                JobEnvelope::new(workflow.id.as_str(), job.name.to_string()),
            )
            .await
            .change_context(ExecutionError::Enqueue)?;

        tracing::info!(
            workflow_id = %workflow.id,
            job = %job.name,
            queue = %queue,
            "job enqueued"
        );
        Ok(true)
    }

    /// Lazily enumerate every persisted workflow. Entries that vanish or
    /// reference an unregistered class are skipped.
    pub fn all_workflows(&self) -> BoxStream<'_, Result<Workflow>> {
        self.store
            .scan(keys::WORKFLOWS_PATTERN)
            .filter_map(move |key| async move {
                let key = match key {
                    Ok(key) => key,
                    Err(err) => return Some(Err(err.change_context(ExecutionError::State))),
                };
                let id = keys::workflow_id(&key)?.to_string();
                match self.find_workflow(&id).await {
                    Ok(workflow) => Some(Ok(workflow)),
                    Err(err)
                        if matches!(
                            err.current_context(),
                            ExecutionError::WorkflowNotFound { .. }
                        ) =>
                    {
                        None
                    }
                    Err(err) => Some(Err(err)),
                }
            })
            .boxed()
    }

    /// First unfinished workflow whose serialized header matches every pair
    /// in `params` (camelCase field names, e.g. `"klass"`, `"linkedId"`).
    ///
    /// When `params` constrains `linkedType`, the workflow's linked record
    /// must also exist according to the configured probe; a missing record
    /// is a predicate false, not an error.
    pub async fn find_not_finished_workflow_by(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<Workflow>> {
        let mut workflows = self.all_workflows();
        while let Some(workflow) = workflows.try_next().await? {
            if workflow.finished() {
                continue;
            }
            let header = serde_json::to_value(workflow.header())
                .change_context(ExecutionError::Serialization)?;
            if !params
                .iter()
                .all(|(key, expected)| header.get(key) == Some(expected))
            {
                continue;
            }
            if params.contains_key("linkedType") {
                let (Some(linked_type), Some(linked_id)) =
                    (&workflow.linked_type, &workflow.linked_id)
                else {
                    continue;
                };
                if !self.linked_records.exists(linked_type, linked_id).await {
                    continue;
                }
            }
            return Ok(Some(workflow));
        }
        Ok(None)
    }
}
