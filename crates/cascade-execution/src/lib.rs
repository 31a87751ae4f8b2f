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

//! Orchestration for Cascade workflows.
//!
//! - [`Client`] - CRUD over persisted workflows and jobs, readiness
//!   transitions, and dispatch to the background queue
//! - [`Worker`] - executes one job and propagates readiness to its
//!   successors under the successor-lock
//! - [`Enqueuer`] - the minimal interface to the background execution
//!   framework
//! - [`EngineConfig`] - store URL, default queue, delays, and TTL
//!
//! The engine is crash-safe by construction: every store write is atomic,
//! job state only moves forward, and the successor-lock serializes the
//! "check ready then enqueue" pair, so a successor is enqueued exactly once
//! no matter how many predecessors finish simultaneously. Delivery is
//! at-least-once; replays of succeeded jobs skip user code but still
//! propagate.

mod client;
mod config;
mod enqueuer;
mod error;
mod hooks;
pub mod ids;
pub mod keys;
mod worker;

pub use client::Client;
pub use config::EngineConfig;
pub use enqueuer::{Enqueuer, EnqueueError, JobEnvelope};
pub use error::{ExecutionError, Result};
pub use hooks::{LinkedRecordProbe, MonitorLoader, NoLinkedRecords, NoopMonitorLoader};
pub use worker::{Worker, WorkerOutcome};
