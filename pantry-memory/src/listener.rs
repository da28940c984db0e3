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

use std::{
    fmt::Debug,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use pantry_common::{
    code::{Key, Value},
    event::{RemovalListener, RemovalNotification},
};

/// Every removal listener registered on a cache.
///
/// Listeners run one after another. A panicking listener is logged and skipped, the others and the cache operation
/// that triggered the removal are not affected.
pub struct RemovalListeners<K, V>
where
    K: Key,
    V: Value,
{
    listeners: Vec<Arc<dyn RemovalListener<K, V>>>,
}

impl<K, V> Debug for RemovalListeners<K, V>
where
    K: Key,
    V: Value,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalListeners")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<K, V> Clone for RemovalListeners<K, V>
where
    K: Key,
    V: Value,
{
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<K, V> Default for RemovalListeners<K, V>
where
    K: Key,
    V: Value,
{
    fn default() -> Self {
        Self { listeners: vec![] }
    }
}

impl<K, V> RemovalListeners<K, V>
where
    K: Key,
    V: Value,
{
    /// Register a listener.
    pub fn push(&mut self, listener: Arc<dyn RemovalListener<K, V>>) {
        self.listeners.push(listener);
    }

    /// Returns `true` if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver one notification to every listener.
    pub fn notify(&self, notification: RemovalNotification<K, V>) {
        let Some((last, rest)) = self.listeners.split_last() else {
            return;
        };
        for listener in rest {
            Self::deliver(listener.as_ref(), notification.clone());
        }
        Self::deliver(last.as_ref(), notification);
    }

    fn deliver(listener: &dyn RemovalListener<K, V>, notification: RemovalNotification<K, V>) {
        let key = notification.key().clone();
        let cause = notification.cause();
        if let Err(e) = catch_unwind(AssertUnwindSafe(|| listener.on_removal(notification))) {
            let reason = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::warn!("[listener]: removal listener panicked, key: {key:?}, cause: {cause:?}, reason: {reason}");
        }
    }

    /// Wrap `listener` so that notifications are delivered on `threads` dedicated threads.
    ///
    /// The caller that triggers a removal only pays for a channel send. Delivery order across threads is not defined.
    pub fn asynchronous(
        listener: Arc<dyn RemovalListener<K, V>>,
        threads: usize,
    ) -> std::io::Result<AsyncRemovalListener<K, V>> {
        AsyncRemovalListener::new(listener, threads)
    }
}

/// [`RemovalListener`] that forwards notifications to notifier threads via channel.
pub struct AsyncRemovalListener<K, V> {
    tx: flume::Sender<RemovalNotification<K, V>>,
}

impl<K, V> AsyncRemovalListener<K, V>
where
    K: Key,
    V: Value,
{
    fn new(nested: Arc<dyn RemovalListener<K, V>>, threads: usize) -> std::io::Result<Self> {
        let (tx, rx) = flume::unbounded();
        let mut listeners = RemovalListeners::default();
        listeners.push(nested);

        for _ in 0..threads.max(1) {
            let worker = NotificationWorker {
                rx: rx.clone(),
                listeners: listeners.clone(),
            };
            std::thread::Builder::new()
                .name("pantry-notifier".to_string())
                .spawn(move || worker.run())?;
        }

        Ok(Self { tx })
    }
}

impl<K, V> RemovalListener<K, V> for AsyncRemovalListener<K, V>
where
    K: Key,
    V: Value,
{
    fn on_removal(&self, notification: RemovalNotification<K, V>) {
        let _ = self.tx.send(notification);
    }
}

/// [`NotificationWorker`] receives notifications and delivers them in its own thread.
///
/// It exits when the last [`AsyncRemovalListener`] sender is dropped.
struct NotificationWorker<K, V>
where
    K: Key,
    V: Value,
{
    rx: flume::Receiver<RemovalNotification<K, V>>,
    listeners: RemovalListeners<K, V>,
}

impl<K, V> NotificationWorker<K, V>
where
    K: Key,
    V: Value,
{
    fn run(self) {
        while let Ok(notification) = self.rx.recv() {
            let rest = self.rx.drain();
            std::iter::once(notification)
                .chain(rest)
                .for_each(|n| self.listeners.notify(n));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pantry_common::event::RemovalCause;
    use parking_lot::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<(u64, RemovalCause)>>>, Arc<dyn RemovalListener<u64, u64>>) {
        let seen = Arc::new(Mutex::new(vec![]));
        let listener = {
            let seen = seen.clone();
            move |n: RemovalNotification<u64, u64>| seen.lock().push((*n.key(), n.cause()))
        };
        (seen, Arc::new(listener))
    }

    #[test_log::test]
    fn test_panicking_listener_is_isolated() {
        let (seen, listener) = recorder();
        let mut listeners = RemovalListeners::default();
        listeners.push(Arc::new(|_: RemovalNotification<u64, u64>| panic!("listener failure")));
        listeners.push(listener);

        listeners.notify(RemovalNotification::new(1, Some(Arc::new(1)), RemovalCause::Explicit));
        listeners.notify(RemovalNotification::new(2, None, RemovalCause::Collected));

        assert_eq!(
            &*seen.lock(),
            &[(1, RemovalCause::Explicit), (2, RemovalCause::Collected)]
        );
    }

    #[test_log::test]
    fn test_async_listener() {
        let (seen, listener) = recorder();
        let async_listener = RemovalListeners::asynchronous(listener, 1).unwrap();

        for i in 0..10 {
            async_listener.on_removal(RemovalNotification::new(i, Some(Arc::new(i)), RemovalCause::Size));
        }

        let mut waited = Duration::ZERO;
        while seen.lock().len() < 10 {
            assert!(waited < Duration::from_secs(10), "notifications not delivered");
            std::thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        let keys = seen.lock().iter().map(|(k, _)| *k).collect::<Vec<_>>();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
    }
}
