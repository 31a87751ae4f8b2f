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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt as _};
use futures::stream::{BoxStream, StreamExt as _};
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::store::{LockGuard, Store};

/// How often a blocked lock acquisition re-checks the lock table.
const LOCK_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    // IndexMap keeps insertion order, so "first field" reads are stable.
    Hash(IndexMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= Instant::now())
    }
}

#[derive(Debug)]
struct HeldLock {
    token: String,
    expires_at: Instant,
}

/// In-memory implementation of [`Store`].
///
/// Single-process storage for tests and embedded use. TTLs are evaluated
/// lazily: an expired entry is treated as absent by every read and purged by
/// the next write that touches it.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    locks: Arc<Mutex<HashMap<String, HeldLock>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL of a key, if one is set. Test/diagnostic helper; not
    /// part of the [`Store`] trait.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expired() {
            return None;
        }
        entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of live (non-expired) keys. Test/diagnostic helper.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|entry| !entry.expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn wrong_type(key: &str) -> error_stack::Report<StateError> {
    error_stack::report!(StateError::WrongType {
        key: key.to_string(),
    })
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

impl Store for InMemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired() => match &entry.value {
                    Value::Str(value) => Ok(Some(value.clone())),
                    Value::Hash(_) => Err(wrong_type(key)),
                },
                _ => Ok(None),
            }
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut entries = self.entries.write().await;
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: None,
                },
            );
            Ok(())
        }
        .boxed()
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut entries = self.entries.write().await;
            entries.remove(key);
            Ok(())
        }
        .boxed()
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let entries = self.entries.read().await;
            Ok(entries.get(key).is_some_and(|entry| !entry.expired()))
        }
        .boxed()
    }

    fn hget<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired() => match &entry.value {
                    Value::Hash(hash) => Ok(hash.get(field).cloned()),
                    Value::Str(_) => Err(wrong_type(key)),
                },
                _ => Ok(None),
            }
        }
        .boxed()
    }

    fn hset<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(IndexMap::new()),
                expires_at: None,
            });
            if entry.expired() {
                *entry = Entry {
                    value: Value::Hash(IndexMap::new()),
                    expires_at: None,
                };
            }
            match &mut entry.value {
                Value::Hash(hash) => {
                    hash.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                Value::Str(_) => Err(wrong_type(key)),
            }
        }
        .boxed()
    }

    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(Entry::expired) {
                entries.remove(key);
                return Ok(());
            }
            match entries.get_mut(key) {
                Some(entry) => match &mut entry.value {
                    Value::Hash(hash) => {
                        hash.shift_remove(field);
                        Ok(())
                    }
                    Value::Str(_) => Err(wrong_type(key)),
                },
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn hvals<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        async move {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired() => match &entry.value {
                    Value::Hash(hash) => Ok(hash.values().cloned().collect()),
                    Value::Str(_) => Err(wrong_type(key)),
                },
                _ => Ok(Vec::new()),
            }
        }
        .boxed()
    }

    fn hexists<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired() => match &entry.value {
                    Value::Hash(hash) => Ok(hash.contains_key(field)),
                    Value::Str(_) => Err(wrong_type(key)),
                },
                _ => Ok(false),
            }
        }
        .boxed()
    }

    fn hscan<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<(String, String)>>> {
        async move {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired() => match &entry.value {
                    Value::Hash(hash) => Ok(hash
                        .iter()
                        .map(|(field, value)| (field.clone(), value.clone()))
                        .collect()),
                    Value::Str(_) => Err(wrong_type(key)),
                },
                _ => Ok(Vec::new()),
            }
        }
        .boxed()
    }

    fn scan<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<String>> {
        async move {
            let entries = self.entries.read().await;
            let keys: Vec<Result<String>> = entries
                .iter()
                .filter(|(key, entry)| !entry.expired() && matches_pattern(key, pattern))
                .map(|(key, _)| Ok(key.clone()))
                .collect();
            futures::stream::iter(keys)
        }
        .flatten_stream()
        .boxed()
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(Entry::expired) {
                entries.remove(key);
                return Ok(());
            }
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
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
        async move {
            let deadline = Instant::now() + acquire_timeout;
            loop {
                {
                    let mut locks = self.locks.lock().await;
                    let free = match locks.get(name) {
                        Some(held) => held.expires_at <= Instant::now(),
                        None => true,
                    };
                    if free {
                        let token = Uuid::new_v4().to_string();
                        locks.insert(
                            name.to_string(),
                            HeldLock {
                                token: token.clone(),
                                expires_at: Instant::now() + hold,
                            },
                        );
                        return Ok(LockGuard::new(name, token));
                    }
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
        async move {
            let mut locks = self.locks.lock().await;
            if locks
                .get(guard.name())
                .is_some_and(|held| held.token == guard.token())
            {
                locks.remove(guard.name());
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_del_exists() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = InMemoryStore::new();
        assert_eq!(store.hget("h", "f").await.unwrap(), None);
        assert!(store.hvals("h").await.unwrap().is_empty());
        assert!(!store.hexists("h", "f").await.unwrap());

        store.hset("h", "f1", "v1").await.unwrap();
        store.hset("h", "f2", "v2").await.unwrap();

        assert_eq!(store.hget("h", "f1").await.unwrap().as_deref(), Some("v1"));
        assert!(store.hexists("h", "f2").await.unwrap());
        assert_eq!(store.hvals("h").await.unwrap(), vec!["v1", "v2"]);
        assert_eq!(
            store.hscan("h").await.unwrap(),
            vec![
                ("f1".to_string(), "v1".to_string()),
                ("f2".to_string(), "v2".to_string()),
            ]
        );

        store.hdel("h", "f1").await.unwrap();
        assert_eq!(store.hget("h", "f1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let store = InMemoryStore::new();
        store.set("k", "v").await.unwrap();
        let err = store.hget("k", "f").await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            StateError::WrongType { key } if key == "k"
        ));

        store.hset("h", "f", "v").await.unwrap();
        assert!(store.get("h").await.is_err());
    }

    #[tokio::test]
    async fn test_scan_matches_prefix() {
        use futures::TryStreamExt as _;

        let store = InMemoryStore::new();
        store.set("workflows:1", "a").await.unwrap();
        store.set("workflows:2", "b").await.unwrap();
        store.set("jobs:1:X", "c").await.unwrap();

        let mut keys: Vec<String> = store
            .scan("workflows:*")
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["workflows:1", "workflows:2"]);
    }

    #[tokio::test]
    async fn test_expire_hides_key() {
        let store = InMemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.expire("k", Duration::from_millis(20)).await.unwrap();
        assert!(store.ttl("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
        assert!(store.ttl("k").await.is_none());
    }

    #[tokio::test]
    async fn test_set_clears_ttl() {
        let store = InMemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.expire("k", Duration::from_millis(20)).await.unwrap();
        store.set("k", "v2").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let store = InMemoryStore::new();
        let guard = store
            .acquire_lock("lk", Duration::from_millis(30), Duration::from_secs(1))
            .await
            .unwrap();

        let err = store
            .acquire_lock("lk", Duration::from_millis(30), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            StateError::LockTimeout { .. }
        ));

        store.release_lock(guard).await.unwrap();
        let guard = store
            .acquire_lock("lk", Duration::from_millis(30), Duration::from_secs(1))
            .await
            .unwrap();
        store.release_lock(guard).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_hold_expiry_frees_the_lock() {
        let store = InMemoryStore::new();
        let stale = store
            .acquire_lock("lk", Duration::from_millis(30), Duration::from_millis(20))
            .await
            .unwrap();

        // the first holder went quiet; after the hold TTL a new holder gets in
        let fresh = store
            .acquire_lock("lk", Duration::from_millis(200), Duration::from_secs(1))
            .await
            .unwrap();

        // the stale guard's release must not evict the new holder
        store.release_lock(stale).await.unwrap();
        let err = store
            .acquire_lock("lk", Duration::from_millis(30), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            StateError::LockTimeout { .. }
        ));

        store.release_lock(fresh).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_serializes_critical_sections() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Arc::new(InMemoryStore::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            let in_section = Arc::clone(&in_section);
            handles.push(tokio::spawn(async move {
                let guard = store
                    .acquire_lock("lk", Duration::from_secs(5), Duration::from_secs(5))
                    .await
                    .unwrap();
                let now = in_section.fetch_add(1, Ordering::SeqCst);
                assert_eq!(now, 0, "two tasks inside the critical section");
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
                store.release_lock(guard).await.unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
