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

//! End-to-end engine tests over the in-memory store: a recording enqueuer
//! stands in for the background queue, and an inline drain loop plays the
//! worker role.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{ready, BoxFuture, FutureExt as _};
use futures::TryStreamExt as _;
use serde_json::json;

use cascade_core::{
    DagBuilder, JobBehavior, JobError, JobOpts, JobStatus, PerformContext, Registry,
};
use cascade_execution::{
    keys, Client, EngineConfig, EnqueueError, Enqueuer, ExecutionError, JobEnvelope, Worker,
    WorkerOutcome,
};
use cascade_state::{InMemoryStore, Store as _};

/// Captures every dispatch and hands envelopes back out like a queue.
#[derive(Default)]
struct RecordingEnqueuer {
    pending: Mutex<VecDeque<JobEnvelope>>,
    log: Mutex<Vec<(String, JobEnvelope)>>,
}

impl RecordingEnqueuer {
    fn pop(&self) -> Option<JobEnvelope> {
        self.pending.lock().unwrap().pop_front()
    }

    fn dispatches_for(&self, klass: &str) -> usize {
        let prefix = format!("{klass}|");
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, envelope)| envelope.job_name.starts_with(&prefix))
            .count()
    }

    fn queues(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(queue, _)| queue.clone())
            .collect()
    }
}

impl Enqueuer for RecordingEnqueuer {
    fn enqueue<'a>(
        &'a self,
        queue: &'a str,
        _delay: Duration,
        envelope: JobEnvelope,
    ) -> BoxFuture<'a, Result<(), error_stack::Report<EnqueueError>>> {
        self.pending.lock().unwrap().push_back(envelope.clone());
        self.log.lock().unwrap().push((queue.to_string(), envelope));
        ready(Ok(())).boxed()
    }
}

/// Returns a fixed value and counts invocations.
struct ValueJob {
    value: serde_json::Value,
    calls: Arc<AtomicUsize>,
}

impl ValueJob {
    fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl JobBehavior for ValueJob {
    fn perform<'a>(
        &'a self,
        _ctx: PerformContext<'a>,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, JobError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.value.clone()))
        }
        .boxed()
    }
}

/// Always raises.
struct FailJob;

impl JobBehavior for FailJob {
    fn perform<'a>(
        &'a self,
        _ctx: PerformContext<'a>,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, JobError>> {
        ready(Err(JobError::new("boom"))).boxed()
    }
}

/// Sums the numeric outputs of its upstream payloads.
struct SumJob;

impl JobBehavior for SumJob {
    fn perform<'a>(
        &'a self,
        ctx: PerformContext<'a>,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, JobError>> {
        async move {
            let total: i64 = ctx
                .job
                .payloads
                .iter()
                .filter_map(|payload| payload.output.as_ref())
                .filter_map(serde_json::Value::as_i64)
                .sum();
            Ok(Some(json!(total)))
        }
        .boxed()
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    enqueuer: Arc<RecordingEnqueuer>,
    client: Client,
    worker: Worker,
}

fn harness(registry: Registry) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let enqueuer = Arc::new(RecordingEnqueuer::default());
    let config = EngineConfig {
        namespace: "test".to_string(),
        ttl: Duration::from_secs(60),
        lock_wait: Duration::from_millis(500),
        lock_hold: Duration::from_secs(2),
        requeue_delay: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let client = Client::new(
        store.clone(),
        Arc::new(registry),
        enqueuer.clone(),
        config,
    );
    let worker = Worker::new(client.clone());
    Harness {
        store,
        enqueuer,
        client,
        worker,
    }
}

/// Run every queued envelope to exhaustion, collecting outcomes.
async fn drain(
    h: &Harness,
) -> Vec<(
    JobEnvelope,
    Result<WorkerOutcome, error_stack::Report<ExecutionError>>,
)> {
    let mut results = Vec::new();
    while let Some(envelope) = h.enqueuer.pop() {
        let outcome = h.worker.run(&envelope).await;
        results.push((envelope, outcome));
    }
    results
}

fn linear_registry() -> (Registry, Arc<AtomicUsize>) {
    let mut registry = Registry::new();
    registry.register_workflow_fn("Linear", |dag: &mut DagBuilder, _args| {
        dag.run("A", JobOpts::new())
            .run("B", JobOpts::new().after("A"))
            .run("C", JobOpts::new().after("B"));
        Ok(())
    });
    let a = ValueJob::new(json!("a"));
    let a_calls = a.calls.clone();
    registry.register_job("A", Arc::new(a));
    registry.register_job("B", Arc::new(ValueJob::new(json!("b"))));
    registry.register_job("C", Arc::new(ValueJob::new(json!("c"))));
    (registry, a_calls)
}

fn fan_in_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_workflow_fn("FanIn", |dag: &mut DagBuilder, _args| {
        dag.run("A", JobOpts::new())
            .run("B", JobOpts::new())
            .run("C", JobOpts::new().after("A").after("B"));
        Ok(())
    });
    registry.register_job("A", Arc::new(ValueJob::new(json!(2))));
    registry.register_job("B", Arc::new(ValueJob::new(json!(3))));
    registry.register_job("C", Arc::new(SumJob));
    registry
}

fn diamond_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_workflow_fn("Diamond", |dag: &mut DagBuilder, _args| {
        dag.run("A", JobOpts::new())
            .run("B", JobOpts::new().after("A"))
            .run("C", JobOpts::new().after("A"))
            .run("D", JobOpts::new().after("B").after("C"));
        Ok(())
    });
    registry.register_job("A", Arc::new(ValueJob::new(json!("a"))));
    registry.register_job("B", Arc::new(FailJob));
    registry.register_job("C", Arc::new(ValueJob::new(json!("c"))));
    registry.register_job("D", Arc::new(ValueJob::new(json!("d"))));
    registry
}

#[tokio::test]
async fn test_linear_dag_runs_to_completion() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();

    // only the initial job is dispatched at start
    assert_eq!(h.enqueuer.dispatches_for("A"), 1);
    assert_eq!(h.enqueuer.dispatches_for("B"), 0);

    for (_, outcome) in drain(&h).await {
        assert_eq!(outcome.unwrap(), WorkerOutcome::Completed);
    }

    // each successor was enqueued exactly once
    assert_eq!(h.enqueuer.dispatches_for("A"), 1);
    assert_eq!(h.enqueuer.dispatches_for("B"), 1);
    assert_eq!(h.enqueuer.dispatches_for("C"), 1);

    let done = h.client.find_workflow(&workflow.id).await.unwrap();
    assert!(done.finished());
    assert!(done.jobs.iter().all(|job| job.succeeded()));

    // finished workflows get their TTL on the header and every job hash
    assert!(h.store.ttl(&keys::workflow(&workflow.id)).await.is_some());
    for klass in ["A", "B", "C"] {
        assert!(h.store.ttl(&keys::jobs(&workflow.id, klass)).await.is_some());
    }
}

#[tokio::test]
async fn test_jobs_dispatch_to_their_queue() {
    let mut registry = Registry::new();
    registry.register_workflow_fn("Queued", |dag: &mut DagBuilder, _args| {
        dag.run("A", JobOpts::new().queue("io"))
            .run("B", JobOpts::new().after("A"));
        Ok(())
    });
    registry.register_job("A", Arc::new(ValueJob::new(json!(1))));
    registry.register_job("B", Arc::new(ValueJob::new(json!(2))));
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Queued", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();
    drain(&h).await;

    // A declared its own queue; B fell back to the namespace
    assert_eq!(h.enqueuer.queues(), vec!["io", "test"]);
}

#[tokio::test]
async fn test_fan_in_waits_for_last_predecessor() {
    let h = harness(fan_in_registry());

    let mut workflow = h.client.create_workflow("FanIn", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();

    let first = h.enqueuer.pop().unwrap();
    let second = h.enqueuer.pop().unwrap();
    let (env_a, env_b) = if first.job_name.starts_with("A|") {
        (first, second)
    } else {
        (second, first)
    };

    // B succeeds first: C must not move, A is still pending
    h.worker.run(&env_b).await.unwrap();
    assert_eq!(h.enqueuer.dispatches_for("C"), 0);

    h.worker.run(&env_a).await.unwrap();
    assert_eq!(h.enqueuer.dispatches_for("C"), 1);

    drain(&h).await;

    // C saw both upstream outputs
    let c = h.client.find_job(&workflow.id, "C").await.unwrap().unwrap();
    assert_eq!(c.output_payload, Some(json!(5)));
    assert!(h
        .client
        .find_workflow(&workflow.id)
        .await
        .unwrap()
        .finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fan_in_enqueues_successor_once() {
    for _ in 0..10 {
        let h = harness(fan_in_registry());

        let mut workflow = h.client.create_workflow("FanIn", vec![]).await.unwrap();
        h.client.start_workflow(&mut workflow, &[]).await.unwrap();

        let env_a = h.enqueuer.pop().unwrap();
        let env_b = h.enqueuer.pop().unwrap();

        // both predecessors finish simultaneously from two workers; both
        // enter the propagation path for C
        let (ra, rb) = tokio::join!(h.worker.run(&env_a), h.worker.run(&env_b));
        ra.unwrap();
        rb.unwrap();

        // a rescheduled invocation may still be pending; drain replays it
        drain(&h).await;

        assert_eq!(h.enqueuer.dispatches_for("C"), 1);
        let c = h.client.find_job(&workflow.id, "C").await.unwrap().unwrap();
        assert!(c.succeeded());
    }
}

#[tokio::test]
async fn test_failed_branch_blocks_downstream() {
    let h = harness(diamond_registry());

    let mut workflow = h.client.create_workflow("Diamond", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();

    let mut failures = 0;
    for (envelope, outcome) in drain(&h).await {
        match outcome {
            Ok(_) => {}
            Err(err) => {
                assert!(envelope.job_name.starts_with("B|"));
                assert!(matches!(
                    err.current_context(),
                    ExecutionError::JobFailed { .. }
                ));
                failures += 1;
            }
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(h.enqueuer.dispatches_for("D"), 0);

    let done = h.client.find_workflow(&workflow.id).await.unwrap();
    let b = done.find_job(&cascade_core::JobSelector::parse("B")).unwrap();
    let d = done.find_job(&cascade_core::JobSelector::parse("D")).unwrap();
    assert_eq!(b.status(), JobStatus::Failed);
    assert_eq!(d.status(), JobStatus::Pending);

    // D can never become ready, so the workflow counts as finished and the
    // keys get their TTL
    assert!(done.finished());
    assert!(h.store.ttl(&keys::workflow(&workflow.id)).await.is_some());
}

#[tokio::test]
async fn test_stop_prevents_successor_enqueue() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();

    let env_a = h.enqueuer.pop().unwrap();
    h.client.stop_workflow(&workflow.id).await.unwrap();

    // A was already in flight; it completes, but propagation observes the
    // stop and skips B
    let outcome = h.worker.run(&env_a).await.unwrap();
    assert_eq!(outcome, WorkerOutcome::Completed);
    assert_eq!(h.enqueuer.dispatches_for("B"), 0);

    let stopped = h.client.find_workflow(&workflow.id).await.unwrap();
    assert!(stopped.stopped);
    assert!(stopped
        .find_job(&cascade_core::JobSelector::parse("A"))
        .unwrap()
        .succeeded());
    assert!(stopped
        .find_job(&cascade_core::JobSelector::parse("B"))
        .unwrap()
        .pending());
}

#[tokio::test]
async fn test_selective_start_enqueues_only_named_jobs() {
    let mut registry = Registry::new();
    registry.register_workflow_fn("TwoRoots", |dag: &mut DagBuilder, _args| {
        dag.run("JobX", JobOpts::new()).run("JobY", JobOpts::new());
        Ok(())
    });
    registry.register_job("JobX", Arc::new(ValueJob::new(json!("x"))));
    registry.register_job("JobY", Arc::new(ValueJob::new(json!("y"))));
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("TwoRoots", vec![]).await.unwrap();
    h.client
        .start_workflow(&mut workflow, &["JobX"])
        .await
        .unwrap();

    assert_eq!(h.enqueuer.dispatches_for("JobX"), 1);
    assert_eq!(h.enqueuer.dispatches_for("JobY"), 0);
}

#[tokio::test]
async fn test_replay_skips_user_code_but_still_propagates() {
    let (registry, a_calls) = linear_registry();
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();

    let env_a = h.enqueuer.pop().unwrap();
    h.worker.run(&env_a).await.unwrap();
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.enqueuer.dispatches_for("B"), 1);

    // at-least-once delivery hands A out again: user code must not rerun,
    // and B (already enqueued) must not be enqueued twice
    let outcome = h.worker.run(&env_a).await.unwrap();
    assert_eq!(outcome, WorkerOutcome::Completed);
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.enqueuer.dispatches_for("B"), 1);
}

#[tokio::test]
async fn test_replay_recovers_missed_propagation() {
    // a worker that died between persisting success and enqueueing the
    // successor leaves A succeeded and B pending; redelivery of A repairs it
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    {
        let a = workflow
            .find_job_mut(&cascade_core::JobSelector::parse("A"))
            .unwrap();
        a.enqueue().unwrap();
        a.start().unwrap();
        a.finish().unwrap();
    }
    h.client.persist_workflow(&mut workflow).await.unwrap();

    let a_name = workflow
        .find_job(&cascade_core::JobSelector::parse("A"))
        .unwrap()
        .name
        .to_string();
    let outcome = h
        .worker
        .run(&JobEnvelope::new(workflow.id.as_str(), a_name))
        .await
        .unwrap();

    assert_eq!(outcome, WorkerOutcome::Completed);
    assert_eq!(h.enqueuer.dispatches_for("B"), 1);
}

#[tokio::test]
async fn test_single_job_workflow() {
    let mut registry = Registry::new();
    registry.register_workflow_fn("One", |dag: &mut DagBuilder, _args| {
        dag.run("Only", JobOpts::new());
        Ok(())
    });
    registry.register_job("Only", Arc::new(ValueJob::new(json!(1))));
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("One", vec![]).await.unwrap();
    h.client.start_workflow(&mut workflow, &[]).await.unwrap();
    assert_eq!(h.enqueuer.dispatches_for("Only"), 1);

    drain(&h).await;

    let done = h.client.find_workflow(&workflow.id).await.unwrap();
    assert!(done.finished());
    assert!(h.store.ttl(&keys::workflow(&workflow.id)).await.is_some());
}

#[tokio::test]
async fn test_create_persist_find_round_trip() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h
        .client
        .create_workflow("Linear", vec![json!("arg"), json!(7)])
        .await
        .unwrap();
    workflow.link("Release", "41");
    assert!(!workflow.persisted);

    h.client.persist_workflow(&mut workflow).await.unwrap();
    assert!(workflow.persisted);

    let found = h.client.find_workflow(&workflow.id).await.unwrap();
    assert_eq!(found, workflow);
    assert!(found.persisted);
}

#[tokio::test]
async fn test_find_workflow_unknown_id() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let err = h.client.find_workflow("missing").await.unwrap_err();
    assert!(matches!(
        err.current_context(),
        ExecutionError::WorkflowNotFound { name } if name == "missing"
    ));
}

#[tokio::test]
async fn test_create_workflow_unknown_class() {
    let h = harness(Registry::new());
    let err = h.client.create_workflow("Nope", vec![]).await.unwrap_err();
    assert!(matches!(
        err.current_context(),
        ExecutionError::WorkflowNotFound { name } if name == "Nope"
    ));
}

#[tokio::test]
async fn test_find_job_lookups() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.persist_workflow(&mut workflow).await.unwrap();

    let by_klass = h.client.find_job(&workflow.id, "B").await.unwrap().unwrap();
    assert_eq!(by_klass.klass, "B");

    let exact = by_klass.name.to_string();
    let by_name = h
        .client
        .find_job(&workflow.id, &exact)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_name, by_klass);

    assert!(h.client.find_job(&workflow.id, "Zzz").await.unwrap().is_none());
    assert!(h
        .client
        .find_job(&workflow.id, "B|no-such-id")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_destroy_workflow_removes_all_keys() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.persist_workflow(&mut workflow).await.unwrap();
    assert!(!h.store.is_empty().await);

    h.client.destroy_workflow(&workflow).await.unwrap();
    assert!(h.store.is_empty().await);

    let err = h.client.find_workflow(&workflow.id).await.unwrap_err();
    assert!(matches!(
        err.current_context(),
        ExecutionError::WorkflowNotFound { .. }
    ));
}

#[tokio::test]
async fn test_all_workflows_lists_persisted() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut first = h.client.create_workflow("Linear", vec![]).await.unwrap();
    let mut second = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.persist_workflow(&mut first).await.unwrap();
    h.client.persist_workflow(&mut second).await.unwrap();

    let listed: Vec<_> = h.client.all_workflows().try_collect().await.unwrap();
    let mut ids: Vec<&str> = listed.iter().map(|wf| wf.id.as_str()).collect();
    ids.sort_unstable();
    let mut expected = vec![first.id.as_str(), second.id.as_str()];
    expected.sort_unstable();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_find_not_finished_workflow_by_header_fields() {
    let (registry, _) = linear_registry();
    let h = harness(registry);

    let mut workflow = h
        .client
        .create_workflow("Linear", vec![json!("target")])
        .await
        .unwrap();
    h.client.persist_workflow(&mut workflow).await.unwrap();

    let mut params = serde_json::Map::new();
    params.insert("klass".to_string(), json!("Linear"));
    let found = h
        .client
        .find_not_finished_workflow_by(&params)
        .await
        .unwrap();
    assert_eq!(found.as_ref().map(|wf| wf.id.as_str()), Some(workflow.id.as_str()));

    params.insert("klass".to_string(), json!("Other"));
    assert!(h
        .client
        .find_not_finished_workflow_by(&params)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_find_not_finished_workflow_by_linked_record() {
    struct AllowRelease;
    impl cascade_execution::LinkedRecordProbe for AllowRelease {
        fn exists<'a>(&'a self, record_type: &'a str, _id: &'a str) -> BoxFuture<'a, bool> {
            ready(record_type == "Release").boxed()
        }
    }

    let (registry, _) = linear_registry();
    let h = harness(registry);
    let client = h.client.clone().with_linked_record_probe(Arc::new(AllowRelease));

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    workflow.link("Release", "41");
    h.client.persist_workflow(&mut workflow).await.unwrap();

    let mut params = serde_json::Map::new();
    params.insert("linkedType".to_string(), json!("Release"));
    let found = client.find_not_finished_workflow_by(&params).await.unwrap();
    assert!(found.is_some());

    // the default probe reports no linked records, so the same lookup
    // through the unconfigured client matches nothing
    assert!(h
        .client
        .find_not_finished_workflow_by(&params)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_monitor_loader_attaches_and_links() {
    struct FixedMonitor;
    impl cascade_execution::MonitorLoader for FixedMonitor {
        fn load_for<'a>(
            &'a self,
            _workflow: &'a cascade_core::Workflow,
        ) -> BoxFuture<'a, Option<cascade_core::Monitor>> {
            ready(Some(cascade_core::Monitor {
                monitorable_type: "Deploy".to_string(),
                monitorable_id: "7".to_string(),
            }))
            .boxed()
        }
    }

    let (registry, _) = linear_registry();
    let h = harness(registry);
    let client = h.client.clone().with_monitor_loader(Arc::new(FixedMonitor));

    let mut workflow = h.client.create_workflow("Linear", vec![]).await.unwrap();
    h.client.persist_workflow(&mut workflow).await.unwrap();

    let found = client.find_workflow(&workflow.id).await.unwrap();
    assert_eq!(
        found.monitor.as_ref().map(|m| m.monitorable_type.as_str()),
        Some("Deploy")
    );
    assert_eq!(found.linked_type.as_deref(), Some("Deploy"));
    assert_eq!(found.linked_id.as_deref(), Some("7"));
}
