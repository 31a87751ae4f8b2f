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

//! Optional integration points.
//!
//! Both hooks default to no-ops so engines without external systems behave
//! identically to ones that never configured them.

use futures::future::{ready, BoxFuture, FutureExt as _};

use cascade_core::{Monitor, Workflow};

/// Loads the external observer attached to a workflow, if any. Called by
/// the client after reconstruction; a returned monitor is attached and its
/// monitorable linked.
pub trait MonitorLoader: Send + Sync {
    fn load_for<'a>(&'a self, workflow: &'a Workflow) -> BoxFuture<'a, Option<Monitor>>;
}

/// Default loader: no workflow has a monitor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitorLoader;

impl MonitorLoader for NoopMonitorLoader {
    fn load_for<'a>(&'a self, _workflow: &'a Workflow) -> BoxFuture<'a, Option<Monitor>> {
        ready(None).boxed()
    }
}

/// Existence probe for linked external records. Only consulted by
/// [`find_not_finished_workflow_by`] when the caller constrains
/// `linked_type`; a missing record is a predicate false, never an error.
///
/// [`find_not_finished_workflow_by`]: crate::Client::find_not_finished_workflow_by
pub trait LinkedRecordProbe: Send + Sync {
    fn exists<'a>(&'a self, record_type: &'a str, id: &'a str) -> BoxFuture<'a, bool>;
}

/// Default probe: no linked record exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLinkedRecords;

impl LinkedRecordProbe for NoLinkedRecords {
    fn exists<'a>(&'a self, _record_type: &'a str, _id: &'a str) -> BoxFuture<'a, bool> {
        ready(false).boxed()
    }
}
