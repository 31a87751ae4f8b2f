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

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::store::Store;

/// Run `body` while holding the named advisory lock.
///
/// The lock is released after `body` resolves, whatever it resolved to; the
/// body's own error handling is the caller's business. Acquisition failure
/// short-circuits with [`StateError::LockTimeout`] before `body` runs.
///
/// [`StateError::LockTimeout`]: crate::StateError::LockTimeout
pub async fn with_lock<S, F, Fut, T>(
    store: &S,
    name: &str,
    acquire_timeout: Duration,
    hold: Duration,
    body: F,
) -> Result<T>
where
    S: Store + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let guard = store.acquire_lock(name, acquire_timeout, hold).await?;
    let out = body().await;
    store.release_lock(guard).await?;
    Ok(out)
}
