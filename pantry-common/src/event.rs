// Copyright 2026 pantry Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::code::{Key, Value};

/// The reason an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalCause {
    /// Removed by the user via `invalidate`, `invalidate_all` or a map view removal.
    Explicit,
    /// Value overwritten by `put` or by a refresh.
    Replaced,
    /// Key or value reclaimed because the cache held it weakly or softly.
    Collected,
    /// Evicted to honor `maximum_size` or `maximum_weight`.
    Size,
    /// Expired by `expire_after_access` or `expire_after_write`.
    Expired,
}

impl RemovalCause {
    /// Returns `true` if the removal was decided by the cache rather than requested by the user.
    pub fn was_evicted(&self) -> bool {
        matches!(self, Self::Collected | Self::Size | Self::Expired)
    }
}

/// A removed entry together with its cause.
///
/// `value` is `None` when the value was already reclaimed.
pub struct RemovalNotification<K, V> {
    key: K,
    value: Option<Arc<V>>,
    cause: RemovalCause,
}

impl<K, V> Debug for RemovalNotification<K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalNotification")
            .field("key", &self.key)
            .field("has_value", &self.value.is_some())
            .field("cause", &self.cause)
            .finish()
    }
}

impl<K, V> Clone for RemovalNotification<K, V>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            cause: self.cause,
        }
    }
}

impl<K, V> RemovalNotification<K, V> {
    /// Create a notification.
    pub fn new(key: K, value: Option<Arc<V>>, cause: RemovalCause) -> Self {
        Self { key, value, cause }
    }

    /// Key of the removed entry.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Value of the removed entry, if still reachable.
    pub fn value(&self) -> Option<&Arc<V>> {
        self.value.as_ref()
    }

    /// Why the entry was removed.
    pub fn cause(&self) -> RemovalCause {
        self.cause
    }

    /// Shorthand for `self.cause().was_evicted()`.
    pub fn was_evicted(&self) -> bool {
        self.cause.was_evicted()
    }

    /// Split into parts.
    pub fn into_parts(self) -> (K, Option<Arc<V>>, RemovalCause) {
        (self.key, self.value, self.cause)
    }
}

/// Trait for the customized removal listener.
///
/// Listeners are invoked on the thread that caused the removal after the shard lock is released, unless they are
/// wrapped to run asynchronously. A panicking listener is logged and does not affect the cache operation.
pub trait RemovalListener<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    /// Called once for every entry that leaves the cache.
    fn on_removal(&self, notification: RemovalNotification<K, V>);
}

impl<K, V, F> RemovalListener<K, V> for F
where
    K: Key,
    V: Value,
    F: Fn(RemovalNotification<K, V>) + Send + Sync + 'static,
{
    fn on_removal(&self, notification: RemovalNotification<K, V>) {
        self(notification)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_was_evicted() {
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
        assert!(RemovalCause::Collected.was_evicted());
        assert!(RemovalCause::Size.was_evicted());
        assert!(RemovalCause::Expired.was_evicted());
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(vec![]));
        let listener = {
            let seen = seen.clone();
            move |n: RemovalNotification<u64, String>| {
                seen.lock().push((*n.key(), n.value().map(|v| v.as_str().to_string()), n.cause()));
            }
        };

        listener.on_removal(RemovalNotification::new(1, Some(Arc::new("one".to_string())), RemovalCause::Size));
        listener.on_removal(RemovalNotification::new(2, None, RemovalCause::Collected));

        assert_eq!(
            &*seen.lock(),
            &[
                (1, Some("one".to_string()), RemovalCause::Size),
                (2, None, RemovalCause::Collected),
            ]
        );
    }
}
