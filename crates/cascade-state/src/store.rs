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

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;

/// Proof of holding a named advisory lock.
///
/// The token is stamped by the acquiring store call; release is a
/// compare-and-delete on it, so an expired guard held past its TTL cannot
/// evict a newer holder.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    token: String,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Typed operations over the backing key-value store.
///
/// Values are UTF-8 strings (the engine stores JSON records). Hash keys and
/// plain keys share one keyspace; using a key with the wrong family of
/// operations yields [`StateError::WrongType`].
///
/// [`StateError::WrongType`]: crate::StateError::WrongType
pub trait Store: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>>;

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn hget<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn hset<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<()>>;

    fn hvals<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    fn hexists<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// All field/value pairs of a hash. A missing key is an empty hash.
    fn hscan<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<(String, String)>>>;

    /// Lazily enumerate keys matching a `prefix*` pattern.
    fn scan<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<String>>;

    /// Schedule the key for deletion after `ttl`.
    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>>;

    /// Acquire the named advisory lock, polling until `acquire_timeout`
    /// elapses. The lock auto-expires after `hold` so a dead holder cannot
    /// wedge its peers. Failure to acquire in time is
    /// [`StateError::LockTimeout`].
    ///
    /// [`StateError::LockTimeout`]: crate::StateError::LockTimeout
    fn acquire_lock<'a>(
        &'a self,
        name: &'a str,
        acquire_timeout: Duration,
        hold: Duration,
    ) -> BoxFuture<'a, Result<LockGuard>>;

    /// Release a held lock. A no-op when the guard's hold TTL already
    /// expired and someone else re-acquired.
    fn release_lock<'a>(&'a self, guard: LockGuard) -> BoxFuture<'a, Result<()>>;
}
