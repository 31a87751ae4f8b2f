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

//! Declaration and validation of a workflow's graph shape.
//!
//! Workflow definitions declare jobs against a [`DagBuilder`]; [`build`]
//! resolves the `after` references, rejects unknown references and cycles,
//! and yields the ordered template list the client materializes jobs from.
//!
//! [`build`]: DagBuilder::build

use std::collections::VecDeque;

use crate::error::{CoreError, Result};
use crate::job::Job;
use crate::name::JobName;

/// Per-job declaration options.
#[derive(Debug, Clone, Default)]
pub struct JobOpts {
    queue: Option<String>,
    after: Vec<String>,
}

impl JobOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch this job to a specific queue instead of the engine default.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Declare an upstream dependency on every job of the named class.
    pub fn after(mut self, klass: impl Into<String>) -> Self {
        self.after.push(klass.into());
        self
    }
}

/// A validated job declaration. `after` holds resolved indices into the
/// template list.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub klass: String,
    pub queue: Option<String>,
    pub after: Vec<usize>,
}

/// Collects job declarations for one workflow.
///
/// `after` references may point forward; resolution happens at [`build`].
/// The same class may be declared more than once; a dependency on that
/// class then covers every instance.
///
/// [`build`]: DagBuilder::build
#[derive(Debug, Default)]
pub struct DagBuilder {
    declarations: Vec<(String, JobOpts)>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a job of the given class.
    pub fn run(&mut self, klass: impl Into<String>, opts: JobOpts) -> &mut Self {
        self.declarations.push((klass.into(), opts));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Resolve references and validate acyclicity.
    pub fn build(self) -> Result<Vec<JobTemplate>> {
        let mut templates: Vec<JobTemplate> = Vec::with_capacity(self.declarations.len());

        for (klass, opts) in &self.declarations {
            let mut after = Vec::new();
            for reference in &opts.after {
                let mut found = false;
                for (idx, (other, _)) in self.declarations.iter().enumerate() {
                    if other == reference {
                        after.push(idx);
                        found = true;
                    }
                }
                if !found {
                    return Err(error_stack::report!(CoreError::UnknownDependency {
                        reference: reference.clone(),
                    }));
                }
            }
            templates.push(JobTemplate {
                klass: klass.clone(),
                queue: opts.queue.clone(),
                after,
            });
        }

        validate_acyclic(&templates)?;
        Ok(templates)
    }
}

/// Kahn's algorithm over the template graph.
fn validate_acyclic(templates: &[JobTemplate]) -> Result<()> {
    let mut indegree = vec![0usize; templates.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); templates.len()];

    for (idx, template) in templates.iter().enumerate() {
        indegree[idx] = template.after.len();
        for &up in &template.after {
            downstream[up].push(idx);
        }
    }

    let mut ready: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut visited = 0usize;

    while let Some(idx) = ready.pop_front() {
        visited += 1;
        for &down in &downstream[idx] {
            indegree[down] -= 1;
            if indegree[down] == 0 {
                ready.push_back(down);
            }
        }
    }

    if visited == templates.len() {
        Ok(())
    } else {
        Err(error_stack::report!(CoreError::CycleDetected))
    }
}

/// Materialize jobs from validated templates and pre-assigned ids, wiring
/// the `incoming`/`outgoing` edge sets consistently in both directions.
pub fn instantiate(templates: &[JobTemplate], ids: &[String]) -> Vec<Job> {
    debug_assert_eq!(templates.len(), ids.len());

    let names: Vec<JobName> = templates
        .iter()
        .zip(ids)
        .map(|(template, id)| JobName::new(template.klass.clone(), id.clone()))
        .collect();

    let mut jobs: Vec<Job> = templates
        .iter()
        .zip(ids)
        .map(|(template, id)| {
            let mut job = Job::new(template.klass.clone(), id.clone());
            job.queue = template.queue.clone();
            job
        })
        .collect();

    for (idx, template) in templates.iter().enumerate() {
        for &up in &template.after {
            jobs[idx].incoming.push(names[up].clone());
            jobs[up].outgoing.push(names[idx].clone());
        }
    }

    jobs
}
