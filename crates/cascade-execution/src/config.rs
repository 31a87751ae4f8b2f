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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration. Every field has a default; durations are expressed
/// in whole seconds in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Connection URL of the backing store.
    pub store_url: String,

    /// Default queue jobs are dispatched to when they carry no queue of
    /// their own.
    pub namespace: String,

    /// Delay inserted before every job dispatch.
    #[serde(with = "duration_secs")]
    pub job_delay: Duration,

    /// TTL applied to a workflow's keys once it is finished.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// How long a worker waits for a successor-lock before rescheduling
    /// itself.
    #[serde(with = "duration_secs")]
    pub lock_wait: Duration,

    /// Auto-expiry of a held successor-lock, bounding the damage of a
    /// worker dying inside the critical section.
    #[serde(with = "duration_secs")]
    pub lock_hold: Duration,

    /// Delay before a worker invocation that lost the successor-lock race
    /// is retried.
    #[serde(with = "duration_secs")]
    pub requeue_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_url: "redis://127.0.0.1:6379/0".to_string(),
            namespace: "cascade".to_string(),
            job_delay: Duration::ZERO,
            ttl: Duration::from_secs(60 * 60 * 24 * 30),
            lock_wait: Duration::from_secs(2),
            lock_hold: Duration::from_secs(10),
            requeue_delay: Duration::from_secs(2),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
