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

use error_stack::ResultExt as _;

use cascade_core::{Job, JobPayload, JobSelector, PerformContext, Workflow};
use cascade_state::{with_lock, StateError};

use crate::client::Client;
use crate::enqueuer::JobEnvelope;
use crate::error::{ExecutionError, Result};
use crate::keys;

/// How a worker invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The job ran (or was a replay) and successor propagation completed.
    Completed,
    /// A successor-lock could not be acquired in time; the whole invocation
    /// was re-enqueued and will redo propagation idempotently.
    Rescheduled,
}

/// Executes one job end to end.
///
/// The runtime is invoked by the background queue with a [`JobEnvelope`].
/// It loads the job, runs user code, persists the transition, and then
/// re-reads each successor under its successor-lock, enqueueing the ones
/// that just became ready. Delivery is at-least-once: replays
/// of an already-succeeded job skip `perform` but still propagate, which is
/// what makes a crash between "persist success" and "enqueue successor"
/// recoverable.
pub struct Worker {
    client: Client,
}

impl Worker {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run the enveloped job. Fails with [`ExecutionError::JobFailed`] when
    /// user code raises (after the failure is persisted), so the execution
    /// framework can record it.
    pub async fn run(&self, envelope: &JobEnvelope) -> Result<WorkerOutcome> {
        let result = self.execute(envelope).await;

        // whatever happened above, a finished workflow gets its TTL
        match (result, self.finalize(&envelope.workflow_id).await) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(finalize_err)) => Err(finalize_err),
            (Err(err), finalize) => {
                if let Err(finalize_err) = finalize {
                    tracing::warn!(
                        workflow_id = %envelope.workflow_id,
                        error = ?finalize_err,
                        "finished-check failed after job error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, envelope: &JobEnvelope) -> Result<WorkerOutcome> {
        let workflow = self.client.find_workflow(&envelope.workflow_id).await?;
        let selector = JobSelector::parse(&envelope.job_name);
        let mut job = workflow
            .find_job(&selector)
            .cloned()
            .ok_or_else(|| {
                error_stack::report!(ExecutionError::JobNotFound {
                    workflow_id: envelope.workflow_id.clone(),
                    name: envelope.job_name.clone(),
                })
            })?;

        if job.succeeded() {
            // at-least-once replay: skip user code, redo propagation
            tracing::debug!(
                workflow_id = %workflow.id,
                job = %job.name,
                "job already succeeded; replaying propagation only"
            );
        } else {
            self.perform(&workflow, &mut job).await?;
        }

        self.propagate(envelope, &job).await
    }

    /// Transition the job to running, execute user code, and persist the
    /// terminal transition.
    async fn perform(&self, workflow: &Workflow, job: &mut Job) -> Result<()> {
        let behavior = self.client.registry().job(&job.klass).ok_or_else(|| {
            error_stack::report!(ExecutionError::internal(format!(
                "no behavior registered for job class {:?}",
                job.klass
            )))
        })?;

        job.payloads = collect_payloads(workflow, job);
        job.start()
            .change_context(ExecutionError::internal("job is not startable"))?;
        self.client.persist_job(&workflow.id, job).await?;
        tracing::info!(workflow_id = %workflow.id, job = %job.name, "job started");

        let ctx = PerformContext {
            workflow_id: &workflow.id,
            arguments: &workflow.arguments,
            job,
        };
        let outcome = behavior.perform(ctx).await;
        match outcome {
            Ok(output) => {
                job.output_payload = output;
                job.finish()
                    .change_context(ExecutionError::internal("job is not finishable"))?;
                self.client.persist_job(&workflow.id, job).await?;
                tracing::info!(workflow_id = %workflow.id, job = %job.name, "job succeeded");
                Ok(())
            }
            Err(user_err) => {
                job.fail()
                    .change_context(ExecutionError::internal("job is not failable"))?;
                self.client.persist_job(&workflow.id, job).await?;
                tracing::error!(
                    workflow_id = %workflow.id,
                    job = %job.name,
                    error = %user_err,
                    "job failed"
                );
                Err(error_stack::report!(ExecutionError::JobFailed {
                    workflow_id: workflow.id.clone(),
                    name: job.name.to_string(),
                })
                .attach_printable(user_err.to_string()))
            }
        }
    }

    /// For each outgoing edge, enqueue the successor if it just became
    /// ready.
    ///
    /// The check-then-enqueue pair runs under the successor-lock against a
    /// freshly loaded snapshot: two predecessors finishing simultaneously
    /// both get here, but only the first to hold the lock sees the
    /// successor pending, and the monotonic enqueue flag blocks the second.
    async fn propagate(&self, envelope: &JobEnvelope, job: &Job) -> Result<WorkerOutcome> {
        let config = self.client.config().clone();

        for successor in &job.outgoing {
            let lock_name = keys::successor_lock(&envelope.workflow_id, successor);
            let attempt = with_lock(
                self.client.store().as_ref(),
                &lock_name,
                config.lock_wait,
                config.lock_hold,
                || async {
                    let fresh = self.client.find_workflow(&envelope.workflow_id).await?;
                    if fresh.stopped {
                        tracing::debug!(
                            workflow_id = %fresh.id,
                            successor = %successor,
                            "workflow stopped; skipping successor"
                        );
                        return Ok::<(), error_stack::Report<ExecutionError>>(());
                    }
                    if !fresh.ready_to_start(successor) {
                        return Ok(());
                    }
                    let Some(ready) = fresh.job(successor) else {
                        return Ok(());
                    };
                    let mut ready = ready.clone();
                    self.client.enqueue_job(&fresh, &mut ready).await?;
                    Ok(())
                },
            )
            .await;

            match attempt {
                Ok(body_result) => body_result?,
                Err(lock_err)
                    if matches!(lock_err.current_context(), StateError::LockTimeout { .. }) =>
                {
                    // someone else is deciding this successor right now;
                    // retry the whole invocation rather than block the
                    // executor
                    tracing::warn!(
                        workflow_id = %envelope.workflow_id,
                        successor = %successor,
                        "successor-lock busy; rescheduling worker"
                    );
                    let queue = job
                        .queue
                        .clone()
                        .unwrap_or_else(|| config.namespace.clone());
                    self.client
                        .enqueuer()
                        .enqueue(&queue, config.requeue_delay, envelope.clone())
                        .await
                        .change_context(ExecutionError::Enqueue)?;
                    return Ok(WorkerOutcome::Rescheduled);
                }
                Err(lock_err) => return Err(lock_err.change_context(ExecutionError::State)),
            }
        }

        Ok(WorkerOutcome::Completed)
    }

    /// Apply the configured TTL once every job is terminal or unreachable.
    async fn finalize(&self, workflow_id: &str) -> Result<()> {
        let workflow = self.client.find_workflow(workflow_id).await?;
        if workflow.finished() {
            tracing::info!(workflow_id = %workflow.id, "workflow finished; applying ttl");
            self.client
                .expire_workflow(&workflow, self.client.config().ttl)
                .await?;
        }
        Ok(())
    }
}

/// Collect `{id, class, output}` from every upstream job in the snapshot.
fn collect_payloads(workflow: &Workflow, job: &Job) -> Vec<JobPayload> {
    job.incoming
        .iter()
        .filter_map(|name| workflow.job(name))
        .map(|upstream| JobPayload {
            id: upstream.id.clone(),
            klass: upstream.klass.clone(),
            output: upstream.output_payload.clone(),
        })
        .collect()
}
