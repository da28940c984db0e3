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
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    ops::Deref,
    sync::Arc,
    time::Duration,
};

use equivalent::Equivalent;
use pantry_common::{
    clock::{Clock, ClockRef, SystemClock},
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, ErrorKind, Result},
    event::RemovalListener,
    spawn::Spawner,
};

use crate::{
    eviction::EvictionConfig,
    expiry::ExpirationPolicy,
    listener::RemovalListeners,
    loader::Loader,
    raw::{CacheEntry, RawCache, RawCacheConfig, RefreshHandle, Weigher},
    reference::Strength,
    spec::CacheSpec,
    stats::CacheStats,
};

const DEFAULT_INITIAL_CAPACITY: usize = 16;
const DEFAULT_CONCURRENCY_LEVEL: usize = 4;

/// Number of shards for the requested concurrency level.
///
/// The count is the smallest power of two reaching `concurrency_level`, doubled only while `shards * 20` stays within
/// a bounded capacity, so tiny bounded caches keep a single exact eviction order.
fn shards_for(concurrency_level: usize, capacity: Option<usize>) -> usize {
    let mut shards = 1;
    while shards < concurrency_level && capacity.is_none_or(|c| shards * 20 <= c) {
        shards <<= 1;
    }
    shards
}

/// Builder of [`Cache`] and [`LoadingCache`].
///
/// ```rust
/// # use pantry_memory::CacheBuilder;
/// # use std::time::Duration;
/// let cache = CacheBuilder::new()
///     .with_maximum_size(200)
///     .with_expire_after_write(Duration::from_secs(120))
///     .build_with_loader(|key: &u64| Ok::<_, std::io::Error>(key * 2))
///     .unwrap();
/// assert_eq!(*cache.get(&21).unwrap(), 42);
/// ```
pub struct CacheBuilder<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    name: String,

    maximum_size: Option<usize>,
    maximum_weight: Option<usize>,
    weigher: Option<Arc<dyn Weigher<K, V>>>,
    initial_capacity: usize,
    concurrency_level: usize,
    eviction_config: EvictionConfig,
    hash_builder: S,

    key_strength: Strength,
    value_strength: Strength,

    expire_after_access: Option<Duration>,
    expire_after_write: Option<Duration>,
    refresh_after_write: Option<Duration>,

    record_stats: bool,
    listeners: RemovalListeners<K, V>,

    clock: ClockRef,
    spawner: Option<Spawner>,
    cleanup_interval: Option<Duration>,
}

impl<K, V, S> Debug for CacheBuilder<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("maximum_size", &self.maximum_size)
            .field("maximum_weight", &self.maximum_weight)
            .field("weigher", &self.weigher.is_some())
            .field("initial_capacity", &self.initial_capacity)
            .field("concurrency_level", &self.concurrency_level)
            .field("eviction_config", &self.eviction_config)
            .field("key_strength", &self.key_strength)
            .field("value_strength", &self.value_strength)
            .field("expire_after_access", &self.expire_after_access)
            .field("expire_after_write", &self.expire_after_write)
            .field("refresh_after_write", &self.refresh_after_write)
            .field("record_stats", &self.record_stats)
            .field("listeners", &self.listeners)
            .field("clock", &self.clock)
            .field("spawner", &self.spawner)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

impl<K, V> Default for CacheBuilder<K, V, DefaultHashBuilder>
where
    K: Key,
    V: Value,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V, DefaultHashBuilder>
where
    K: Key,
    V: Value,
{
    /// Create an unbounded builder with strong references and no expiration.
    pub fn new() -> Self {
        Self {
            name: "pantry".to_string(),
            maximum_size: None,
            maximum_weight: None,
            weigher: None,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            eviction_config: EvictionConfig::default(),
            hash_builder: DefaultHashBuilder::default(),
            key_strength: Strength::Strong,
            value_strength: Strength::Strong,
            expire_after_access: None,
            expire_after_write: None,
            refresh_after_write: None,
            record_stats: false,
            listeners: RemovalListeners::default(),
            clock: Arc::new(SystemClock),
            spawner: None,
            cleanup_interval: None,
        }
    }

    /// Create a builder configured by a parsed descriptor.
    pub fn from_spec(spec: &CacheSpec) -> Self {
        let mut builder = Self::new();
        if let Some(v) = spec.initial_capacity {
            builder = builder.with_initial_capacity(v);
        }
        if let Some(v) = spec.maximum_size {
            builder = builder.with_maximum_size(v);
        }
        if let Some(v) = spec.maximum_weight {
            builder = builder.with_maximum_weight(v);
        }
        if let Some(v) = spec.concurrency_level {
            builder = builder.with_concurrency_level(v);
        }
        if let Some(v) = spec.key_strength {
            builder.key_strength = v;
        }
        if let Some(v) = spec.value_strength {
            builder = builder.with_value_strength(v);
        }
        if let Some(v) = spec.record_stats {
            builder = builder.with_record_stats(v);
        }
        if let Some(v) = spec.expire_after_access {
            builder = builder.with_expire_after_access(v);
        }
        if let Some(v) = spec.expire_after_write {
            builder = builder.with_expire_after_write(v);
        }
        if let Some(v) = spec.refresh_after_write {
            builder = builder.with_refresh_after_write(v);
        }
        builder
    }

    /// Parse a descriptor such as `maximumSize=200,expireAfterWrite=2m` into a builder.
    pub fn from_spec_str(spec: &str) -> Result<Self> {
        let spec = spec.parse::<CacheSpec>()?;
        Ok(Self::from_spec(&spec))
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Set the cache name used in log lines and error context.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bound the number of entries.
    ///
    /// Cannot be combined with [`CacheBuilder::with_maximum_weight`].
    pub fn with_maximum_size(mut self, maximum_size: usize) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }

    /// Bound the total weight of entries. Requires a weigher.
    pub fn with_maximum_weight(mut self, maximum_weight: usize) -> Self {
        self.maximum_weight = Some(maximum_weight);
        self
    }

    /// Set the weigher. The weight of an entry is computed once on insertion.
    pub fn with_weigher(mut self, weigher: impl Weigher<K, V>) -> Self {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Pre-size the indexers.
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Hint the number of concurrently writing threads. Controls the shard count.
    ///
    /// The default value is 4.
    pub fn with_concurrency_level(mut self, concurrency_level: usize) -> Self {
        self.concurrency_level = concurrency_level;
        self
    }

    /// Set the eviction algorithm.
    ///
    /// The default value is LRU.
    pub fn with_eviction_config(mut self, eviction_config: impl Into<EvictionConfig>) -> Self {
        self.eviction_config = eviction_config.into();
        self
    }

    /// Set the hash builder.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> CacheBuilder<K, V, OS>
    where
        OS: HashBuilder,
    {
        CacheBuilder {
            name: self.name,
            maximum_size: self.maximum_size,
            maximum_weight: self.maximum_weight,
            weigher: self.weigher,
            initial_capacity: self.initial_capacity,
            concurrency_level: self.concurrency_level,
            eviction_config: self.eviction_config,
            hash_builder,
            key_strength: self.key_strength,
            value_strength: self.value_strength,
            expire_after_access: self.expire_after_access,
            expire_after_write: self.expire_after_write,
            refresh_after_write: self.refresh_after_write,
            record_stats: self.record_stats,
            listeners: self.listeners,
            clock: self.clock,
            spawner: self.spawner,
            cleanup_interval: self.cleanup_interval,
        }
    }

    /// Hold keys weakly. An entry lives while a caller holds its [`CacheEntry`].
    pub fn with_weak_keys(mut self) -> Self {
        self.key_strength = Strength::Weak;
        self
    }

    /// Hold values weakly.
    pub fn with_weak_values(mut self) -> Self {
        self.value_strength = Strength::Weak;
        self
    }

    /// Hold values softly. See [`Cache::reclaim_soft`].
    pub fn with_soft_values(mut self) -> Self {
        self.value_strength = Strength::Soft;
        self
    }

    /// Set the value strength. The last setting wins.
    pub fn with_value_strength(mut self, strength: Strength) -> Self {
        self.value_strength = strength;
        self
    }

    /// Expire entries not read or written for `duration`.
    pub fn with_expire_after_access(mut self, duration: Duration) -> Self {
        self.expire_after_access = Some(duration);
        self
    }

    /// Expire entries not written for `duration`.
    pub fn with_expire_after_write(mut self, duration: Duration) -> Self {
        self.expire_after_write = Some(duration);
        self
    }

    /// Reload entries read `duration` after their last write. Only valid for a [`LoadingCache`].
    pub fn with_refresh_after_write(mut self, duration: Duration) -> Self {
        self.refresh_after_write = Some(duration);
        self
    }

    /// Enable statistics.
    pub fn with_record_stats(mut self, record_stats: bool) -> Self {
        self.record_stats = record_stats;
        self
    }

    /// Register a removal listener. Listeners are called in registration order.
    pub fn with_removal_listener(mut self, listener: impl RemovalListener<K, V>) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Set the runtime for background refreshes.
    ///
    /// A dedicated single-worker runtime is created on the first refresh if none is set.
    pub fn with_spawner(mut self, spawner: impl Into<Spawner>) -> Self {
        self.spawner = Some(spawner.into());
        self
    }

    /// Reconcile expired and collected entries every `interval` on a background thread.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    fn validate(&self) -> Result<Option<usize>> {
        let capacity = match (self.maximum_size, self.maximum_weight) {
            (Some(_), Some(_)) => return Err(Error::conflict("maximumSize", "maximumWeight")),
            (Some(size), None) => {
                if self.weigher.is_some() {
                    return Err(Error::conflict("maximumSize", "weigher"));
                }
                Some(size)
            }
            (None, Some(weight)) => {
                if self.weigher.is_none() {
                    return Err(Error::new(ErrorKind::Config, "maximumWeight requires a weigher"));
                }
                Some(weight)
            }
            (None, None) => {
                if self.weigher.is_some() {
                    return Err(Error::new(ErrorKind::Config, "weigher requires maximumWeight"));
                }
                None
            }
        };
        if self.concurrency_level == 0 {
            return Err(Error::new(ErrorKind::Config, "concurrencyLevel must be positive"));
        }
        Ok(capacity)
    }

    fn build_raw(self, loader: Option<Arc<dyn Loader<K, V>>>) -> Result<RawCache<K, V, S>> {
        let capacity = self.validate().map_err(|e| e.with_context("cache", &self.name))?;
        let shards = shards_for(self.concurrency_level, capacity);
        let weigher = self
            .weigher
            .unwrap_or_else(|| Arc::new(|_: &K, _: &V| 1usize) as Arc<dyn Weigher<K, V>>);

        RawCache::new(RawCacheConfig {
            name: self.name,
            capacity,
            shards,
            initial_capacity: self.initial_capacity,
            eviction_config: self.eviction_config,
            hash_builder: self.hash_builder,
            weigher,
            key_strength: self.key_strength,
            value_strength: self.value_strength,
            expiration: ExpirationPolicy::new(
                self.expire_after_access,
                self.expire_after_write,
                self.refresh_after_write,
            ),
            record_stats: self.record_stats,
            listeners: self.listeners,
            loader,
            clock: self.clock,
            spawner: self.spawner,
            cleanup_interval: self.cleanup_interval,
        })
    }

    /// Build a cache without a loader.
    pub fn build(self) -> Result<Cache<K, V, S>> {
        if self.refresh_after_write.is_some() {
            return Err(Error::conflict("refreshAfterWrite", "a cache without loader").with_context("cache", &self.name));
        }
        let raw = self.build_raw(None)?;
        Ok(Cache { raw })
    }

    /// Build a cache that loads missing keys with `loader`.
    pub fn build_with_loader(self, loader: impl Loader<K, V>) -> Result<LoadingCache<K, V, S>> {
        let raw = self.build_raw(Some(Arc::new(loader)))?;
        Ok(LoadingCache { cache: Cache { raw } })
    }
}

/// A concurrent in-memory cache populated by explicit writes or by per-call loaders.
pub struct Cache<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    raw: RawCache<K, V, S>,
}

impl<K, V, S> Clone for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self { raw: self.raw.clone() }
    }
}

impl<K, V, S> Debug for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Cache").field(&self.raw).finish()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Get the entry of `key` if cached. Never loads.
    pub fn get_if_present<Q>(&self, key: &Q) -> Option<CacheEntry<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.get_if_present(key)
    }

    /// Get the entry of `key`, computing it with `load` on a miss.
    ///
    /// Concurrent callers for the same key block on a single invocation. A failure is handed to every waiting caller
    /// and is not cached.
    pub fn get_or_load<F, E>(&self, key: &K, load: F) -> Result<CacheEntry<K, V>>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<anyhow::Error>,
    {
        self.raw.get_or_load_with(key, |k| load(k).map_err(Into::into))
    }

    /// Cache `value` for `key`, replacing the previous value.
    pub fn put(&self, key: K, value: V) -> CacheEntry<K, V> {
        self.raw.insert(key, value)
    }

    /// Cache every pair of `entries`.
    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.raw.insert(key, value);
        }
    }

    /// Discard the entry of `key`, returning it if it was usable.
    pub fn invalidate<Q>(&self, key: &Q) -> Option<CacheEntry<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.remove(key)
    }

    /// Discard the entries of `keys`.
    pub fn invalidate_keys<'a, I, Q>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a Q>,
        Q: Hash + Equivalent<K> + ?Sized + 'a,
    {
        for key in keys {
            self.raw.remove(key);
        }
    }

    /// Discard every entry.
    pub fn invalidate_all(&self) {
        self.raw.clear()
    }

    /// Returns `true` if a usable entry of `key` is cached. Not counted in the statistics.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.contains(key)
    }

    /// Approximate number of entries.
    ///
    /// Collected and expired entries are counted until they are reconciled by an access, a write or
    /// [`Cache::cleanup`].
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    /// Total weight of the entries, with the same reconciliation as [`Cache::size`].
    pub fn weighted_size(&self) -> usize {
        self.raw.usage()
    }

    /// Snapshot of the statistics. All zero unless statistics are enabled.
    pub fn stats(&self) -> CacheStats {
        self.raw.stats()
    }

    /// Snapshot of every usable entry. Not counted as access.
    pub fn as_map(&self) -> HashMap<K, Arc<V>> {
        self.raw.to_map()
    }

    /// Reconcile expired and collected entries now.
    pub fn cleanup(&self) {
        self.raw.cleanup()
    }

    /// Drop soft values no caller holds. Returns the number of values collected.
    pub fn reclaim_soft(&self) -> usize {
        self.raw.reclaim_soft()
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    /// Number of shards.
    pub fn shards(&self) -> usize {
        self.raw.shards()
    }

    /// Configured bound on count or weight.
    pub fn capacity(&self) -> Option<usize> {
        self.raw.capacity()
    }
}

/// A [`Cache`] bound to a [`Loader`].
pub struct LoadingCache<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    cache: Cache<K, V, S>,
}

impl<K, V, S> Clone for LoadingCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K, V, S> Debug for LoadingCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoadingCache").field(&self.cache.raw).finish()
    }
}

impl<K, V, S> Deref for LoadingCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    type Target = Cache<K, V, S>;

    fn deref(&self) -> &Self::Target {
        &self.cache
    }
}

impl<K, V, S> LoadingCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Get the entry of `key`, loading it on a miss.
    ///
    /// Blocks while another caller loads the same key.
    pub fn get(&self, key: &K) -> Result<CacheEntry<K, V>> {
        self.cache.raw.get_with_loader(key)
    }

    /// Get the entry of `key` without blocking the async runtime.
    ///
    /// The lookup and a possible load run on the refresh spawner's blocking pool.
    pub async fn get_async(&self, key: K) -> Result<CacheEntry<K, V>> {
        self.cache.raw.get_async(key).await
    }

    /// Get the entries of `keys`, loading the missing ones in one [`Loader::load_all`] call.
    pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, CacheEntry<K, V>>>
    where
        I: IntoIterator<Item = K>,
    {
        self.cache.raw.get_all(keys)
    }

    /// Reload `key` in the background, serving the current value meanwhile.
    pub fn refresh(&self, key: &K) -> RefreshHandle {
        self.cache.raw.refresh(key)
    }

    /// The loader-less view of the cache.
    pub fn as_cache(&self) -> &Cache<K, V, S> {
        &self.cache
    }
}
