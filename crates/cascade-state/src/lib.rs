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

//! Store abstraction for the Cascade engine.
//!
//! The engine persists workflow and job records through the [`Store`] trait:
//! plain keys, hashes, prefix scans, TTLs, and named advisory locks. All
//! workers share one logical store instance; every mutation is atomic at the
//! operation level.
//!
//! [`InMemoryStore`] is the single-process implementation used by tests and
//! embedded deployments; `cascade-state-redis` provides the shared backend.

mod error;
mod in_memory;
mod lock;
mod store;

pub use error::{Result, StateError};
pub use in_memory::InMemoryStore;
pub use lock::with_lock;
pub use store::{LockGuard, Store};
