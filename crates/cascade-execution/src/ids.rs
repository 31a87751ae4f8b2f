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

//! Collision-checked identifier generation.
//!
//! UUIDs do not collide in practice, but tests may pin the RNG, so each
//! candidate is probed against the store before being handed out.

use error_stack::ResultExt as _;
use uuid::Uuid;

use cascade_state::Store;

use crate::error::{ExecutionError, Result};
use crate::keys;

/// A workflow id no `workflows:<id>` key currently uses.
pub async fn next_workflow_id(store: &dyn Store) -> Result<String> {
    loop {
        let id = Uuid::new_v4().to_string();
        let taken = store
            .exists(&keys::workflow(&id))
            .await
            .change_context(ExecutionError::State)?;
        if !taken {
            return Ok(id);
        }
    }
}

/// A job id not present in the `jobs:<wfid>:<klass>` hash.
pub async fn next_job_id(store: &dyn Store, workflow_id: &str, klass: &str) -> Result<String> {
    let key = keys::jobs(workflow_id, klass);
    loop {
        let id = Uuid::new_v4().to_string();
        let taken = store
            .hexists(&key, &id)
            .await
            .change_context(ExecutionError::State)?;
        if !taken {
            return Ok(id);
        }
    }
}
