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

//! Redis-backed [`Store`] for multi-worker Cascade deployments.
//!
//! All workers share one logical Redis instance; every engine mutation maps
//! to a single atomic Redis command.
//!
//! # Key usage
//!
//! | Engine operation | Redis command |
//! |---|---|
//! | `get`/`set`/`del`/`exists` | `GET`/`SET`/`DEL`/`EXISTS` |
//! | hash operations | `HGET`/`HSET`/`HDEL`/`HVALS`/`HEXISTS`/`HSCAN` |
//! | `scan(pattern)` | cursored `SCAN MATCH`, streamed lazily |
//! | `expire` | `EXPIRE` |
//! | `acquire_lock` | `SET <name> <token> NX PX <hold>`, polled |
//! | `release_lock` | compare-and-delete script on the token |

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use error_stack::ResultExt as _;
use futures::future::{BoxFuture, FutureExt as _};
use futures::stream::BoxStream;
use futures::StreamExt as _;
use redis::aio::ConnectionManager;
use redis::AsyncCommands as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cascade_state::{LockGuard, Result, StateError, Store};

/// How often a blocked lock acquisition retries `SET NX`.
const LOCK_POLL: Duration = Duration::from_millis(250);

/// Batch size hint for cursored scans.
const SCAN_COUNT: usize = 100;

/// Deletes the lock key only while it still carries the caller's token, so
/// a guard held past its TTL cannot evict the next holder.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Configuration for the Redis store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379/0`).
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

/// Redis implementation of [`Store`].
///
/// Wraps a [`ConnectionManager`], which multiplexes one TCP connection and
/// reconnects transparently; cloning the store shares that connection.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis instance at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .change_context(StateError::Connection)
            .attach_printable_lazy(|| format!("invalid redis url: {url}"))?;
        let manager = client
            .get_connection_manager()
            .await
            .change_context(StateError::Connection)?;
        Ok(Self { manager })
    }

    pub async fn connect_with(config: &RedisStoreConfig) -> Result<Self> {
        Self::connect(&config.url).await
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Per-process connection cache keyed by URL.
///
/// Workers reuse the manager across job executions instead of reconnecting
/// per job; changing the configured URL drops the cached manager and
/// connects to the new instance.
#[derive(Default)]
pub struct ConnectionCache {
    cached: tokio::sync::Mutex<Option<(String, ConnectionManager)>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store for `url`, reusing the cached connection when the URL is
    /// unchanged.
    pub async fn store(&self, url: &str) -> Result<RedisStore> {
        let mut cached = self.cached.lock().await;
        if let Some((cached_url, manager)) = cached.as_ref() {
            if cached_url == url {
                return Ok(RedisStore {
                    manager: manager.clone(),
                });
            }
            tracing::debug!(old = %cached_url, new = %url, "store url changed, reconnecting");
        }
        let store = RedisStore::connect(url).await?;
        *cached = Some((url.to_string(), store.manager.clone()));
        Ok(store)
    }
}

impl Store for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        let mut conn = self.connection();
        async move {
            conn.get(key)
                .await
                .change_context(StateError::Internal)
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        let mut conn = self.connection();
        async move {
            let _: () = conn
                .set(key, value)
                .await
                .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        let mut conn = self.connection();
        async move {
            let _: () = conn
                .del(key)
                .await
                .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        let mut conn = self.connection();
        async move {
            conn.exists(key)
                .await
                .change_context(StateError::Internal)
        }
        .boxed()
    }

    fn hget<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        let mut conn = self.connection();
        async move {
            conn.hget(key, field)
                .await
                .change_context(StateError::Internal)
        }
        .boxed()
    }

    fn hset<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        let mut conn = self.connection();
        async move {
            let _: () = conn
                .hset(key, field, value)
                .await
                .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<()>> {
        let mut conn = self.connection();
        async move {
            let _: () = conn
                .hdel(key, field)
                .await
                .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn hvals<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        let mut conn = self.connection();
        async move {
            conn.hvals(key)
                .await
                .change_context(StateError::Internal)
        }
        .boxed()
    }

    fn hexists<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<bool>> {
        let mut conn = self.connection();
        async move {
            conn.hexists(key, field)
                .await
                .change_context(StateError::Internal)
        }
        .boxed()
    }

    fn hscan<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<(String, String)>>> {
        let mut conn = self.connection();
        async move {
            let mut out = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, flat): (u64, Vec<String>) = redis::cmd("HSCAN")
                    .arg(key)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await
                    .change_context(StateError::Internal)?;
                // HSCAN replies alternate field, value
                let mut flat = flat.into_iter();
                while let (Some(field), Some(value)) = (flat.next(), flat.next()) {
                    out.push((field, value));
                }
                if next == 0 {
                    return Ok(out);
                }
                cursor = next;
            }
        }
        .boxed()
    }

    fn scan<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<String>> {
        struct ScanState {
            conn: ConnectionManager,
            pattern: String,
            cursor: u64,
            buffer: VecDeque<String>,
            done: bool,
        }

        let state = ScanState {
            conn: self.connection(),
            pattern: pattern.to_string(),
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(key) = state.buffer.pop_front() {
                    return Ok(Some((key, state)));
                }
                if state.done {
                    return Ok(None);
                }
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(state.cursor)
                    .arg("MATCH")
                    .arg(&state.pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut state.conn)
                    .await
                    .change_context(StateError::Internal)?;
                state.cursor = next;
                state.buffer.extend(keys);
                if next == 0 {
                    state.done = true;
                }
            }
        })
        .boxed()
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        let mut conn = self.connection();
        async move {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }

    fn acquire_lock<'a>(
        &'a self,
        name: &'a str,
        acquire_timeout: Duration,
        hold: Duration,
    ) -> BoxFuture<'a, Result<LockGuard>> {
        let mut conn = self.connection();
        async move {
            let token = Uuid::new_v4().to_string();
            let deadline = Instant::now() + acquire_timeout;
            loop {
                let acquired: Option<String> = redis::cmd("SET")
                    .arg(name)
                    .arg(&token)
                    .arg("NX")
                    .arg("PX")
                    .arg(hold.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .change_context(StateError::Internal)?;
                if acquired.is_some() {
                    return Ok(LockGuard::new(name, token));
                }
                if Instant::now() >= deadline {
                    return Err(error_stack::report!(StateError::LockTimeout {
                        name: name.to_string(),
                    }));
                }
                tokio::time::sleep(LOCK_POLL).await;
            }
        }
        .boxed()
    }

    fn release_lock<'a>(&'a self, guard: LockGuard) -> BoxFuture<'a, Result<()>> {
        let mut conn = self.connection();
        async move {
            let _: i64 = redis::Script::new(RELEASE_LOCK_SCRIPT)
                .key(guard.name())
                .arg(guard.token())
                .invoke_async(&mut conn)
                .await
                .change_context(StateError::Internal)?;
            Ok(())
        }
        .boxed()
    }
}
