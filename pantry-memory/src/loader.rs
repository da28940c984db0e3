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

use std::{collections::HashMap, fmt::Debug, future::Future};

use futures_util::{future::BoxFuture, FutureExt};
use pantry_common::{
    code::{Key, Value},
    error::Error,
};

/// Outcome of [`Loader::reload`].
pub enum Reload<V> {
    /// The new value, computed on the refreshing thread.
    Ready(anyhow::Result<V>),
    /// A future resolving to the new value, polled on the cache spawner.
    Future(BoxFuture<'static, anyhow::Result<V>>),
}

impl<V> Debug for Reload<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reload::Ready(res) => f.debug_tuple("Ready").field(&res.is_ok()).finish(),
            Reload::Future(_) => f.debug_tuple("Future").finish(),
        }
    }
}

impl<V> Reload<V> {
    /// Box a future as a reload.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self::Future(future.boxed())
    }

    /// Wait for the new value.
    pub async fn resolve(self) -> anyhow::Result<V> {
        match self {
            Reload::Ready(res) => res,
            Reload::Future(future) => future.await,
        }
    }
}

/// Computes values for keys missing from a [`crate::LoadingCache`].
///
/// Any `Fn(&K) -> Result<V, E>` closure is a loader whose reload is a plain load.
pub trait Loader<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    /// Compute the value of `key`.
    fn load(&self, key: &K) -> anyhow::Result<V>;

    /// Compute a replacement for `old` when the entry is refreshed.
    ///
    /// Return [`Reload::Future`] to finish the refresh without occupying a blocking thread.
    #[expect(unused_variables)]
    fn reload(&self, key: &K, old: &V) -> Reload<V> {
        Reload::Ready(self.load(key))
    }

    /// Compute the values of several keys at once.
    ///
    /// Every requested key must be present in the result, extra keys are cached as well.
    fn load_all(&self, keys: &[K]) -> anyhow::Result<HashMap<K, V>> {
        keys.iter().map(|key| Ok((key.clone(), self.load(key)?))).collect()
    }
}

impl<K, V, E, F> Loader<K, V> for F
where
    K: Key,
    V: Value,
    E: Into<anyhow::Error>,
    F: Fn(&K) -> std::result::Result<V, E> + Send + Sync + 'static,
{
    fn load(&self, key: &K) -> anyhow::Result<V> {
        self(key).map_err(Into::into)
    }
}

/// Turn a loader failure into a cache error, keeping errors raised by the cache itself as they are.
pub fn load_error(e: anyhow::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(e) => e,
        Err(e) => Error::load(e),
    }
}

#[cfg(test)]
mod tests {
    use pantry_common::error::ErrorKind;

    use super::*;

    struct Doubler;

    impl Loader<u64, u64> for Doubler {
        fn load(&self, key: &u64) -> anyhow::Result<u64> {
            Ok(key * 2)
        }

        fn reload(&self, key: &u64, old: &u64) -> Reload<u64> {
            let next = key * 2 + old;
            Reload::future(async move { Ok(next) })
        }
    }

    #[test]
    fn test_closure_loader() {
        let loader = |key: &u64| -> Result<String, std::io::Error> {
            match key {
                0 => Err(std::io::Error::other("zero")),
                k => Ok(k.to_string()),
            }
        };
        assert_eq!(loader.load(&7).unwrap(), "7");
        assert!(loader.load(&0).is_err());

        let all = loader.load_all(&[1, 2]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&2], "2");
        assert!(loader.load_all(&[1, 0]).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_reload() {
        let loader = |key: &u64| -> anyhow::Result<u64> { Ok(*key) };
        assert_eq!(loader.reload(&3, &1).resolve().await.unwrap(), 3);
        assert_eq!(Doubler.reload(&3, &1).resolve().await.unwrap(), 7);
        assert!(matches!(Doubler.reload(&3, &1), Reload::Future(_)));
    }

    #[test]
    fn test_load_error() {
        let e = load_error(anyhow::anyhow!("backend down"));
        assert_eq!(e.kind(), ErrorKind::Load);

        let invalid = Error::new(ErrorKind::InvalidLoadResult, "missing key");
        let e = load_error(anyhow::Error::new(invalid));
        assert_eq!(e.kind(), ErrorKind::InvalidLoadResult);
    }
}
