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
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};

use equivalent::Equivalent;
use itertools::Itertools;
use pantry_common::{
    clock::ClockRef,
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, ErrorKind, Result},
    event::{RemovalCause, RemovalNotification},
    slab::SlabLinkedList,
    spawn::Spawner,
    strict_assert, strict_assert_eq,
};
use parking_lot::{Mutex, RwLock};

use crate::{
    eviction::{Eviction, EvictionConfig, Op},
    expiry::{ExpirationPolicy, Freshness},
    indexer::{HashTableIndexer, Slot},
    inflight::{Enqueue, InflightMap, Waiter},
    listener::RemovalListeners,
    loader::{load_error, Loader, Reload},
    record::{Data, Record},
    reference::Strength,
    stats::{CacheStats, StatsCounter},
};

/// The weigher of the cache.
///
/// The weight of an entry is computed once on insertion and only used against `maximum_weight`.
pub trait Weigher<K, V>: Fn(&K, &V) -> usize + Send + Sync + 'static {}
impl<K, V, T> Weigher<K, V> for T where T: Fn(&K, &V) -> usize + Send + Sync + 'static {}

/// A cached key and value handed out to callers.
///
/// Holding an entry keeps a weakly held key or value alive.
pub struct CacheEntry<K, V> {
    key: Arc<K>,
    value: Arc<V>,
    weight: usize,
}

impl<K, V> Clone for CacheEntry<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            weight: self.weight,
        }
    }
}

impl<K, V> Debug for CacheEntry<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("weight", &self.weight)
            .finish()
    }
}

impl<K, V> Deref for CacheEntry<K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<K, V> CacheEntry<K, V> {
    pub(crate) fn new(key: Arc<K>, value: Arc<V>, weight: usize) -> Self {
        Self { key, value, weight }
    }

    /// Key of the entry.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Value of the entry.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Shared handle of the key.
    pub fn key_arc(&self) -> &Arc<K> {
        &self.key
    }

    /// Shared handle of the value.
    pub fn value_arc(&self) -> &Arc<V> {
        &self.value
    }

    /// Weight computed on insertion.
    pub fn weight(&self) -> usize {
        self.weight
    }

    /// Take the shared value out of the entry.
    pub fn into_value(self) -> Arc<V> {
        self.value
    }
}

/// Receives the outcome of [`RawCache::refresh`].
#[derive(Debug)]
pub struct RefreshHandle {
    rx: flume::Receiver<bool>,
}

impl RefreshHandle {
    fn ready(committed: bool) -> Self {
        let (tx, rx) = flume::bounded(1);
        let _ = tx.send(committed);
        Self { rx }
    }

    /// Block until the refresh finishes.
    ///
    /// Returns `true` if this refresh installed a new value, `false` if it failed, was superseded by a write, or
    /// found a load or refresh of the key already running.
    pub fn wait(self) -> bool {
        self.rx.recv().unwrap_or(false)
    }

    /// Async flavor of [`RefreshHandle::wait`].
    pub async fn completed(self) -> bool {
        self.rx.recv_async().await.unwrap_or(false)
    }
}

pub(crate) struct RawCacheConfig<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub name: String,
    pub capacity: Option<usize>,
    pub shards: usize,
    pub initial_capacity: usize,
    pub eviction_config: EvictionConfig,
    pub hash_builder: S,
    pub weigher: Arc<dyn Weigher<K, V>>,
    pub key_strength: Strength,
    pub value_strength: Strength,
    pub expiration: ExpirationPolicy,
    pub record_stats: bool,
    pub listeners: RemovalListeners<K, V>,
    pub loader: Option<Arc<dyn Loader<K, V>>>,
    pub clock: ClockRef,
    pub spawner: Option<Spawner>,
    pub cleanup_interval: Option<Duration>,
}

type Garbage<K, V> = (RemovalCause, Arc<Record<K, V>>);

enum Lookup<K, V> {
    Hit(CacheEntry<K, V>, Option<Arc<Record<K, V>>>),
    Miss,
    Stale,
}

enum Probe<K, V> {
    Hit(CacheEntry<K, V>, Option<Arc<Record<K, V>>>),
    Miss,
    Lead(u64),
    Wait(Waiter<K, V>),
}

enum Claim<K, V> {
    Lead(Arc<Record<K, V>>, u64),
    Skip,
    Absent,
}

struct RawCacheShard<K, V>
where
    K: Key,
    V: Value,
{
    indexer: HashTableIndexer<K, V>,
    eviction: Box<dyn Eviction<K, V>>,
    access_queue: Option<SlabLinkedList<Arc<Record<K, V>>>>,
    write_queue: Option<SlabLinkedList<Arc<Record<K, V>>>>,

    usage: usize,
    capacity: Option<usize>,

    expiration: ExpirationPolicy,
}

impl<K, V> RawCacheShard<K, V>
where
    K: Key,
    V: Value,
{
    fn new(
        capacity: Option<usize>,
        initial_capacity: usize,
        eviction_config: &EvictionConfig,
        expiration: ExpirationPolicy,
    ) -> Self {
        let eviction = eviction_config.build(initial_capacity);
        // An access ordered policy doubles as the idle expiry queue.
        let access_queue = (expiration.expires_after_access() && eviction.acquire() == Op::Immutable)
            .then(|| SlabLinkedList::with_capacity(initial_capacity));
        let write_queue = expiration
            .expires_after_write()
            .then(|| SlabLinkedList::with_capacity(initial_capacity));
        Self {
            indexer: HashTableIndexer::with_capacity(initial_capacity),
            eviction,
            access_queue,
            write_queue,
            usage: 0,
            capacity,
            expiration,
        }
    }

    fn read_op(&self) -> Op {
        match (self.eviction.acquire(), &self.access_queue) {
            (Op::Immutable, None) => Op::Immutable,
            _ => Op::Mutable,
        }
    }

    /// Drop a removed slot from the write and access queues and release its weight.
    fn detach(&mut self, slot: Slot<K, V>) -> Arc<Record<K, V>> {
        if let (Some(queue), Some(token)) = (self.access_queue.as_mut(), slot.access) {
            queue.remove(token);
        }
        if let (Some(queue), Some(token)) = (self.write_queue.as_mut(), slot.write) {
            queue.remove(token);
        }
        self.usage -= slot.record.weight();
        slot.record
    }

    /// Drop a removed slot from every order.
    fn unlink(&mut self, slot: Slot<K, V>) -> Arc<Record<K, V>> {
        self.eviction.remove(slot.eviction);
        self.detach(slot)
    }

    fn remove_record(&mut self, record: &Arc<Record<K, V>>, cause: RemovalCause, garbages: &mut Vec<Garbage<K, V>>) {
        if let Some(slot) = self.indexer.remove_record(record) {
            let record = self.unlink(slot);
            garbages.push((cause, record));
        }
    }

    /// Why a record that is leaving the cache on its own account is going.
    fn cause_of(&self, record: &Record<K, V>, now: u64, otherwise: RemovalCause) -> RemovalCause {
        if !record.is_live() {
            RemovalCause::Collected
        } else if self.expiration.is_expired(record, now) {
            RemovalCause::Expired
        } else {
            otherwise
        }
    }

    /// Insert a record, replacing the one with the same key, then enforce the bounds.
    fn emplace(&mut self, record: Arc<Record<K, V>>, now: u64, garbages: &mut Vec<Garbage<K, V>>) {
        self.expire(now, garbages);

        // An entry heavier than the whole shard only displaces its own key, sparing the others.
        if self.capacity.is_some_and(|capacity| record.weight() > capacity) {
            if let Some(old) = self.indexer.remove(record.hash(), record.key()) {
                let old = self.unlink(old);
                let cause = self.cause_of(&old, now, RemovalCause::Replaced);
                garbages.push((cause, old));
            }
            garbages.push((RemovalCause::Size, record));
            return;
        }

        let eviction = self.eviction.push(record.clone());
        let access = self.access_queue.as_mut().map(|q| q.push_back(record.clone()));
        let write = self.write_queue.as_mut().map(|q| q.push_back(record.clone()));
        self.usage += record.weight();

        if let Some(old) = self.indexer.insert(Slot {
            record: record.clone(),
            eviction,
            access,
            write,
        }) {
            let old = self.unlink(old);
            let cause = self.cause_of(&old, now, RemovalCause::Replaced);
            garbages.push((cause, old));
        }
        strict_assert!(record.is_in_indexer());
        strict_assert!(record.is_in_eviction());

        self.evict(now, garbages);
    }

    /// Evict entries until the usage fits the capacity. The newest entry goes last.
    fn evict(&mut self, now: u64, garbages: &mut Vec<Garbage<K, V>>) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.usage > capacity {
            let Some(victim) = self.eviction.pop() else {
                break;
            };
            match self.indexer.remove_record(&victim) {
                Some(slot) => {
                    let record = self.detach(slot);
                    let cause = self.cause_of(&record, now, RemovalCause::Size);
                    tracing::trace!("[raw]: evict {:?}, cause: {cause:?}", record.key());
                    garbages.push((cause, record));
                }
                None => {
                    strict_assert!(false, "evicted record is not indexed");
                }
            }
        }
    }

    /// Expire entries from the heads of the write and access orders.
    fn expire(&mut self, now: u64, garbages: &mut Vec<Garbage<K, V>>) {
        if self.expiration.expires_after_write() {
            while let Some(head) = self.write_queue.as_ref().and_then(|q| q.front()).cloned() {
                if !self.expiration.is_expired_by_write(&head, now) {
                    break;
                }
                self.expire_head(&head, garbages);
            }
        }
        if self.expiration.expires_after_access() {
            loop {
                let head = match self.access_queue.as_ref() {
                    Some(queue) => queue.front().cloned(),
                    None => self.eviction.peek().cloned(),
                };
                let Some(head) = head else {
                    break;
                };
                if !self.expiration.is_expired_by_access(&head, now) {
                    break;
                }
                self.expire_head(&head, garbages);
            }
        }
    }

    fn expire_head(&mut self, head: &Arc<Record<K, V>>, garbages: &mut Vec<Garbage<K, V>>) {
        let cause = if head.is_live() {
            RemovalCause::Expired
        } else {
            RemovalCause::Collected
        };
        let len = self.indexer.len();
        self.remove_record(head, cause, garbages);
        strict_assert_eq!(self.indexer.len() + 1, len, "expired record is not indexed");
    }

    /// Look up without reordering. Safe under the shared lock.
    fn peek<Q>(&self, hash: u64, key: &Q, now: u64) -> Lookup<K, V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let Some(slot) = self.indexer.get(hash, key) else {
            return Lookup::Miss;
        };
        let record = &slot.record;
        if !record.is_live() {
            return Lookup::Stale;
        }
        let freshness = self.expiration.classify(record, now);
        if freshness == Freshness::Expired {
            return Lookup::Stale;
        }
        record.set_access_time(now);
        match entry_of(record) {
            Some(entry) => Lookup::Hit(entry, (freshness == Freshness::RefreshDue).then(|| record.clone())),
            None => Lookup::Stale,
        }
    }

    /// Look up, reorder on hit and drop a stale entry.
    fn get<Q>(&mut self, hash: u64, key: &Q, now: u64, garbages: &mut Vec<Garbage<K, V>>) -> Lookup<K, V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let Some((record, eviction, access)) = self
            .indexer
            .get(hash, key)
            .map(|slot| (slot.record.clone(), slot.eviction, slot.access))
        else {
            return Lookup::Miss;
        };

        let freshness = self.expiration.classify(&record, now);
        let entry = match freshness {
            Freshness::Expired => None,
            _ => entry_of(&record),
        };
        let Some(entry) = entry else {
            let cause = self.cause_of(&record, now, RemovalCause::Expired);
            self.remove_record(&record, cause, garbages);
            return Lookup::Miss;
        };

        record.set_access_time(now);
        self.eviction.access(eviction);
        if let (Some(queue), Some(token)) = (self.access_queue.as_mut(), access) {
            queue.move_to_back(token);
        }
        Lookup::Hit(entry, (freshness == Freshness::RefreshDue).then_some(record))
    }

    fn remove<Q>(&mut self, hash: u64, key: &Q, now: u64, garbages: &mut Vec<Garbage<K, V>>) -> Option<CacheEntry<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.expire(now, garbages);
        let slot = self.indexer.remove(hash, key)?;
        let record = self.unlink(slot);
        let cause = self.cause_of(&record, now, RemovalCause::Explicit);
        let entry = match cause {
            RemovalCause::Explicit => entry_of(&record),
            _ => None,
        };
        garbages.push((cause, record));
        entry
    }

    fn clear(&mut self, now: u64, garbages: &mut Vec<Garbage<K, V>>) {
        let records = self.indexer.drain().map(|slot| slot.record).collect_vec();
        self.eviction.clear();
        if let Some(queue) = self.access_queue.as_mut() {
            queue.drain();
        }
        if let Some(queue) = self.write_queue.as_mut() {
            queue.drain();
        }
        self.usage = 0;
        for record in records {
            let cause = self.cause_of(&record, now, RemovalCause::Explicit);
            garbages.push((cause, record));
        }
    }

    /// Remove expired entries, and collected ones when `scan` is set.
    fn cleanup(&mut self, now: u64, scan: bool, garbages: &mut Vec<Garbage<K, V>>) {
        self.expire(now, garbages);
        if !scan {
            return;
        }
        let dead = self
            .indexer
            .iter()
            .filter(|slot| !slot.record.is_live())
            .map(|slot| slot.record.clone())
            .collect_vec();
        for record in dead {
            self.remove_record(&record, RemovalCause::Collected, garbages);
        }
    }

    fn is_usable(&self, record: &Record<K, V>, now: u64) -> bool {
        record.is_live() && !self.expiration.is_expired(record, now)
    }
}

fn entry_of<K, V>(record: &Record<K, V>) -> Option<CacheEntry<K, V>>
where
    K: Key,
    V: Value,
{
    Some(CacheEntry::new(record.key_ref()?, record.value()?, record.weight()))
}

struct RawCacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    name: String,

    shards: Vec<RwLock<RawCacheShard<K, V>>>,
    inflights: Vec<Mutex<InflightMap<K, V>>>,
    read_op: Op,

    capacity: Option<usize>,
    hash_builder: S,
    weigher: Arc<dyn Weigher<K, V>>,
    key_strength: Strength,
    value_strength: Strength,

    stats: StatsCounter,
    listeners: RemovalListeners<K, V>,
    loader: Option<Arc<dyn Loader<K, V>>>,

    clock: ClockRef,
    spawner: OnceLock<Spawner>,

    _sweeper: Option<flume::Sender<()>>,
}

/// The sharded cache core shared by [`crate::Cache`] and [`crate::LoadingCache`].
pub struct RawCache<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    inner: Arc<RawCacheInner<K, V, S>>,
}

impl<K, V, S> Clone for RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, S> Debug for RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCache")
            .field("name", &self.inner.name)
            .field("shards", &self.inner.shards.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// Capacity of the shard `index` when `capacity` is split across `shards`.
fn shard_capacity_for(capacity: usize, shards: usize, index: usize) -> usize {
    let base = capacity / shards;
    let remainder = capacity % shards;
    base + usize::from(index < remainder)
}

impl<K, V, S> RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub(crate) fn new(config: RawCacheConfig<K, V, S>) -> Result<Self> {
        let shards = config.shards.max(1);
        let refreshes = config.expiration.refreshes();
        let initial_capacity = config.initial_capacity.div_ceil(shards);

        let shard_states = (0..shards)
            .map(|index| {
                RawCacheShard::new(
                    config.capacity.map(|c| shard_capacity_for(c, shards, index)),
                    initial_capacity,
                    &config.eviction_config,
                    config.expiration,
                )
            })
            .collect_vec();
        let read_op = shard_states.first().map(|s| s.read_op()).unwrap_or(Op::Mutable);
        let shard_locks = shard_states.into_iter().map(RwLock::new).collect_vec();
        let inflights = (0..shards).map(|_| Mutex::new(InflightMap::default())).collect_vec();

        let spawner = OnceLock::new();
        if let Some(s) = config.spawner {
            let _ = spawner.set(s);
        }

        let (sweeper_tx, sweeper_rx) = match config.cleanup_interval {
            Some(_) => {
                let (tx, rx) = flume::bounded::<()>(0);
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let inner = Arc::new(RawCacheInner {
            name: config.name,
            shards: shard_locks,
            inflights,
            read_op,
            capacity: config.capacity,
            hash_builder: config.hash_builder,
            weigher: config.weigher,
            key_strength: config.key_strength,
            value_strength: config.value_strength,
            stats: StatsCounter::new(config.record_stats),
            listeners: config.listeners,
            loader: config.loader,
            clock: config.clock,
            spawner,
            _sweeper: sweeper_tx,
        });

        if let (Some(interval), Some(rx)) = (config.cleanup_interval, sweeper_rx) {
            let weak = Arc::downgrade(&inner);
            std::thread::Builder::new()
                .name("pantry-sweeper".to_string())
                .spawn(move || sweep(weak, rx, interval))
                .map_err(|e| {
                    Error::new(ErrorKind::Runtime, "failed to start sweeper thread")
                        .with_context("cache", &inner.name)
                        .with_source(e)
                })?;
        }

        tracing::info!(
            "[pantry]: cache {} built with {} shard(s), capacity: {:?}, read op: {:?}, refresh: {}",
            inner.name,
            shards,
            inner.capacity,
            read_op,
            refreshes,
        );

        Ok(Self { inner })
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of shards.
    pub fn shards(&self) -> usize {
        self.inner.shards.len()
    }

    /// Configured bound on count or weight, `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.inner.hash_builder.hash_one(key)
    }

    fn shard(&self, hash: u64) -> usize {
        hash as usize % self.inner.shards.len()
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_nanos()
    }

    fn make_record(&self, hash: u64, key: K, key_ref: Arc<K>, value: Arc<V>, now: u64) -> Arc<Record<K, V>> {
        let weight = (self.inner.weigher)(&key, &value);
        Arc::new(Record::new(
            Data {
                key,
                key_ref,
                value,
                hash,
                weight,
                now,
            },
            self.inner.key_strength,
            self.inner.value_strength,
        ))
    }

    /// Deliver removals after every lock is released.
    fn notify(&self, garbages: Vec<Garbage<K, V>>) {
        for (cause, record) in garbages {
            if cause.was_evicted() {
                self.inner.stats.record_eviction();
            }
            if !self.inner.listeners.is_empty() {
                self.inner
                    .listeners
                    .notify(RemovalNotification::new(record.key().clone(), record.value(), cause));
            }
        }
    }

    fn probe<Q>(&self, hash: u64, key: &Q, now: u64, owned: Option<&K>) -> (Probe<K, V>, Vec<Garbage<K, V>>)
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let index = self.shard(hash);
        let mut garbages = vec![];

        if self.inner.read_op == Op::Immutable {
            let shard = self.inner.shards[index].read();
            match shard.peek(hash, key, now) {
                Lookup::Hit(entry, refresh) => return (Probe::Hit(entry, refresh), garbages),
                // Join or lead the load while still holding the lock, so a concurrent completion cannot slip between.
                Lookup::Miss => return (self.enqueue(index, owned), garbages),
                Lookup::Stale => {}
            }
        }

        let mut shard = self.inner.shards[index].write();
        match shard.get(hash, key, now, &mut garbages) {
            Lookup::Hit(entry, refresh) => (Probe::Hit(entry, refresh), garbages),
            Lookup::Miss | Lookup::Stale => (self.enqueue(index, owned), garbages),
        }
    }

    fn enqueue(&self, index: usize, owned: Option<&K>) -> Probe<K, V> {
        match owned {
            None => Probe::Miss,
            Some(key) => match self.inner.inflights[index].lock().enqueue(key) {
                Enqueue::Lead(id) => Probe::Lead(id),
                Enqueue::Wait(rx) => Probe::Wait(rx),
            },
        }
    }

    /// Get a usable entry without loading.
    pub fn get_if_present<Q>(&self, key: &Q) -> Option<CacheEntry<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash(key);
        let now = self.now();
        let (probe, garbages) = self.probe(hash, key, now, None);
        self.notify(garbages);

        match probe {
            Probe::Hit(entry, refresh) => {
                self.inner.stats.record_hits(1);
                if let Some(record) = refresh {
                    self.schedule_refresh(record);
                }
                Some(entry)
            }
            _ => {
                self.inner.stats.record_misses(1);
                None
            }
        }
    }

    /// Get the entry of `key`, loading it with `load` if absent.
    ///
    /// Concurrent callers for the same key share one invocation of a single caller's `load`.
    pub fn get_or_load_with<F>(&self, key: &K, load: F) -> Result<CacheEntry<K, V>>
    where
        F: FnOnce(&K) -> anyhow::Result<V>,
    {
        let hash = self.hash(key);
        let now = self.now();
        let (probe, garbages) = self.probe(hash, key, now, Some(key));
        self.notify(garbages);

        match probe {
            Probe::Hit(entry, refresh) => {
                self.inner.stats.record_hits(1);
                if let Some(record) = refresh {
                    self.schedule_refresh(record);
                }
                Ok(entry)
            }
            Probe::Wait(rx) => {
                let res = rx.recv().map_err(|e| {
                    Error::new(ErrorKind::ChannelClosed, "loading caller is gone")
                        .with_context("key", format!("{key:?}"))
                        .with_source(e)
                })?;
                if res.is_ok() {
                    self.inner.stats.record_hits(1);
                }
                res
            }
            Probe::Lead(id) => {
                self.inner.stats.record_misses(1);
                self.lead(hash, key, id, load)
            }
            Probe::Miss => unreachable!("probing with an owned key always enqueues"),
        }
    }

    /// Get the entry of `key`, loading it with the bound loader if absent.
    pub fn get_with_loader(&self, key: &K) -> Result<CacheEntry<K, V>> {
        let loader = self
            .inner
            .loader
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::Config, "no loader bound to the cache"))?;
        self.get_or_load_with(key, |k| loader.load(k))
    }

    /// Async flavor of [`RawCache::get_with_loader`] running on the spawner's blocking pool.
    pub async fn get_async(&self, key: K) -> Result<CacheEntry<K, V>> {
        let cache = self.clone();
        self.spawner()?
            .spawn_blocking(move || cache.get_with_loader(&key))
            .await?
    }

    fn lead<F>(&self, hash: u64, key: &K, id: u64, load: F) -> Result<CacheEntry<K, V>>
    where
        F: FnOnce(&K) -> anyhow::Result<V>,
    {
        let mut guard = LeaderGuard {
            cache: self,
            hash,
            key,
            id,
            armed: true,
        };

        let start = self.now();
        let res = load(key);
        let elapsed = self.now().saturating_sub(start);

        let res = match res {
            Ok(value) => {
                self.inner.stats.record_load_success(elapsed);
                let (entry, _) = self.commit_load(hash, key, Arc::new(key.clone()), id, value);
                Ok(entry)
            }
            Err(e) => {
                self.inner.stats.record_load_exception(elapsed);
                let e = load_error(e).with_context("key", format!("{key:?}"));
                tracing::debug!("[raw]: load failed: {e}");
                self.fail_load(hash, key, id, &e);
                Err(e)
            }
        };
        guard.armed = false;
        res
    }

    /// Finish the flight `id` with `value`. Returns the entry and whether the value was installed.
    fn commit_load(&self, hash: u64, key: &K, key_ref: Arc<K>, id: u64, value: V) -> (CacheEntry<K, V>, bool) {
        let index = self.shard(hash);
        let now = self.now();
        let value = Arc::new(value);
        let record = self.make_record(hash, key.clone(), key_ref.clone(), value.clone(), now);
        let entry = CacheEntry::new(key_ref, value, record.weight());

        let mut garbages = vec![];
        let (completion, installed) = {
            let mut shard = self.inner.shards[index].write();
            let completion = self.inner.inflights[index].lock().complete(key, id);
            let installed = match &completion {
                Some(c) if c.superseded => {
                    garbages.push((RemovalCause::Replaced, record));
                    false
                }
                _ => {
                    shard.emplace(record, now, &mut garbages);
                    true
                }
            };
            (completion, installed)
        };
        self.notify(garbages);

        if let Some(completion) = completion {
            for notifier in completion.notifiers {
                let _ = notifier.send(Ok(entry.clone()));
            }
        }
        (entry, installed)
    }

    fn fail_load(&self, hash: u64, key: &K, id: u64, e: &Error) {
        let index = self.shard(hash);
        let completion = self.inner.inflights[index].lock().complete(key, id);
        if let Some(completion) = completion {
            for notifier in completion.notifiers {
                let _ = notifier.send(Err(e.clone()));
            }
        }
    }

    /// Install `value` for `key`, replacing any previous value.
    ///
    /// A load of `key` in flight still delivers its value to its callers but does not install it.
    pub fn insert(&self, key: K, value: V) -> CacheEntry<K, V> {
        let hash = self.hash(&key);
        let index = self.shard(hash);
        let now = self.now();
        let key_ref = Arc::new(key.clone());
        let value = Arc::new(value);
        let record = self.make_record(hash, key, key_ref.clone(), value.clone(), now);
        let entry = CacheEntry::new(key_ref, value, record.weight());

        let mut garbages = vec![];
        {
            let mut shard = self.inner.shards[index].write();
            self.inner.inflights[index].lock().supersede(record.key());
            shard.emplace(record, now, &mut garbages);
        }
        self.notify(garbages);
        entry
    }

    /// Remove the entry of `key`. Returns the removed entry if it was usable.
    pub fn remove<Q>(&self, key: &Q) -> Option<CacheEntry<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash(key);
        let now = self.now();
        let mut garbages = vec![];
        let entry = self.inner.shards[self.shard(hash)]
            .write()
            .remove(hash, key, now, &mut garbages);
        self.notify(garbages);
        entry
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let now = self.now();
        let mut garbages = vec![];
        for shard in self.inner.shards.iter() {
            shard.write().clear(now, &mut garbages);
        }
        self.notify(garbages);
    }

    /// Returns `true` if a usable entry of `key` exists. Does not count as an access.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash(key);
        let now = self.now();
        let shard = self.inner.shards[self.shard(hash)].read();
        shard
            .indexer
            .get(hash, key)
            .is_some_and(|slot| shard.is_usable(&slot.record, now))
    }

    /// Number of indexed entries, including collected and expired ones not yet reconciled.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().indexer.len()).sum()
    }

    /// Total weight of indexed entries.
    pub fn usage(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().usage).sum()
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Snapshot of every usable entry.
    pub fn to_map(&self) -> HashMap<K, Arc<V>> {
        let now = self.now();
        let mut map = HashMap::new();
        for shard in self.inner.shards.iter() {
            let shard = shard.read();
            for slot in shard.indexer.iter() {
                if shard.is_usable(&slot.record, now) {
                    if let Some(value) = slot.record.value() {
                        map.insert(slot.record.key().clone(), value);
                    }
                }
            }
        }
        map
    }

    /// Reconcile expired and collected entries.
    pub fn cleanup(&self) {
        let now = self.now();
        let scan = self.inner.key_strength != Strength::Strong || self.inner.value_strength != Strength::Strong;
        let mut garbages = vec![];
        for shard in self.inner.shards.iter() {
            shard.write().cleanup(now, scan, &mut garbages);
        }
        if !garbages.is_empty() {
            tracing::debug!("[raw]: cleanup removed {} entries from {}", garbages.len(), self.inner.name);
        }
        self.notify(garbages);
    }

    /// Drop soft values no caller holds. Returns the number of values collected.
    pub fn reclaim_soft(&self) -> usize {
        if self.inner.value_strength != Strength::Soft {
            return 0;
        }
        let reclaimed: usize = self
            .inner
            .shards
            .iter()
            .map(|shard| shard.read().indexer.iter().filter(|slot| slot.record.reclaim()).count())
            .sum();
        tracing::debug!("[raw]: reclaimed {reclaimed} soft values from {}", self.inner.name);
        reclaimed
    }

    fn spawner(&self) -> Result<&Spawner> {
        if let Some(spawner) = self.inner.spawner.get() {
            return Ok(spawner);
        }
        let spawner = Spawner::dedicated("pantry-refresh", 1)?;
        Ok(self.inner.spawner.get_or_init(|| spawner))
    }

    /// Lead the flight of `key` to reload its usable entry.
    ///
    /// With `expected` set, only that exact record is reloaded.
    fn claim_refresh(&self, hash: u64, key: &K, expected: Option<&Arc<Record<K, V>>>) -> Claim<K, V> {
        let index = self.shard(hash);
        let now = self.now();
        let shard = self.inner.shards[index].read();
        let Some(record) = shard
            .indexer
            .get(hash, key)
            .filter(|slot| shard.is_usable(&slot.record, now))
            .map(|slot| slot.record.clone())
        else {
            return Claim::Absent;
        };
        if expected.is_some_and(|expected| !Arc::ptr_eq(expected, &record)) {
            return Claim::Skip;
        }
        // Enqueue under the shard lock, like a missing read does.
        match self.inner.inflights[index].lock().enqueue(key) {
            Enqueue::Lead(id) => Claim::Lead(record, id),
            Enqueue::Wait(_) => Claim::Skip,
        }
    }

    /// Reload `key` in the background.
    ///
    /// An absent key is loaded through the single-flight path and installed. A present one keeps being served until
    /// the reload finishes, a failed reload leaves it in place. Reads that miss `key` meanwhile wait for the reload.
    pub fn refresh(&self, key: &K) -> RefreshHandle {
        let Some(loader) = self.inner.loader.clone() else {
            tracing::warn!("[raw]: refresh on {} without a loader is ignored", self.inner.name);
            return RefreshHandle::ready(false);
        };
        let spawner = match self.spawner() {
            Ok(spawner) => spawner,
            Err(e) => {
                tracing::warn!("[raw]: cannot refresh, error: {e}");
                return RefreshHandle::ready(false);
            }
        };

        let hash = self.hash(key);
        match self.claim_refresh(hash, key, None) {
            Claim::Lead(record, id) => {
                let (tx, rx) = flume::bounded(1);
                self.spawn_refresh(spawner, record, id, loader, Some(tx));
                RefreshHandle { rx }
            }
            Claim::Skip => RefreshHandle::ready(false),
            Claim::Absent => {
                let (tx, rx) = flume::bounded(1);
                let cache = self.clone();
                let key = key.clone();
                spawner.spawn_blocking(move || {
                    let _ = tx.send(cache.get_with_loader(&key).is_ok());
                });
                RefreshHandle { rx }
            }
        }
    }

    fn schedule_refresh(&self, record: Arc<Record<K, V>>) {
        let Some(loader) = self.inner.loader.clone() else {
            return;
        };
        let spawner = match self.spawner() {
            Ok(spawner) => spawner,
            Err(e) => {
                tracing::warn!("[raw]: cannot refresh, error: {e}");
                return;
            }
        };
        if let Claim::Lead(record, id) = self.claim_refresh(record.hash(), record.key(), Some(&record)) {
            self.spawn_refresh(spawner, record, id, loader, None);
        }
    }

    fn spawn_refresh(
        &self,
        spawner: &Spawner,
        record: Arc<Record<K, V>>,
        id: u64,
        loader: Arc<dyn Loader<K, V>>,
        tx: Option<flume::Sender<bool>>,
    ) {
        let clock = self.inner.clock.clone();
        let key = record.key().clone();
        let old = record.value();
        let blocking = spawner.clone();
        let guard = RefreshGuard {
            inner: Arc::downgrade(&self.inner),
            record,
            id,
            tx,
            armed: true,
        };

        spawner.spawn(async move {
            let start = clock.now_nanos();
            let reload = blocking.spawn_blocking(move || match old {
                Some(old) => loader.reload(&key, &old),
                // The old value is collected, load from scratch.
                None => Reload::Ready(loader.load(&key)),
            });
            let res = match reload.await {
                Ok(reload) => reload.resolve().await.map_err(load_error),
                Err(e) => Err(e),
            };
            let elapsed = clock.now_nanos().saturating_sub(start);
            guard.complete(res, elapsed);
        });
    }

    /// Finish the reload flight `id` of `record`. Returns `true` if the new value was installed.
    fn commit_refresh(&self, record: &Record<K, V>, id: u64, res: Result<V>, elapsed: u64) -> bool {
        match res {
            Ok(value) => {
                self.inner.stats.record_load_success(elapsed);
                let key_ref = record.key_ref().unwrap_or_else(|| Arc::new(record.key().clone()));
                let (_, installed) = self.commit_load(record.hash(), record.key(), key_ref, id, value);
                installed
            }
            Err(e) => {
                self.inner.stats.record_load_exception(elapsed);
                tracing::warn!("[raw]: refresh of {:?} failed, keep the old value, error: {e}", record.key());
                self.fail_load(record.hash(), record.key(), id, &e);
                false
            }
        }
    }

    /// Bulk get. Missing keys are loaded together with [`Loader::load_all`].
    pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, CacheEntry<K, V>>>
    where
        I: IntoIterator<Item = K>,
    {
        let mut res = HashMap::new();
        let mut missing = vec![];
        for key in keys.into_iter().unique() {
            let hash = self.hash(&key);
            let now = self.now();
            let (probe, garbages) = self.probe(hash, &key, now, None);
            self.notify(garbages);
            match probe {
                Probe::Hit(entry, refresh) => {
                    if let Some(record) = refresh {
                        self.schedule_refresh(record);
                    }
                    res.insert(key, entry);
                }
                _ => missing.push(key),
            }
        }
        self.inner.stats.record_hits(res.len() as u64);
        self.inner.stats.record_misses(missing.len() as u64);
        if missing.is_empty() {
            return Ok(res);
        }

        let loader = self
            .inner
            .loader
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::Config, "no loader bound to the cache"))?;
        let start = self.now();
        let loaded = loader.load_all(&missing);
        let elapsed = self.now().saturating_sub(start);
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                self.inner.stats.record_load_exception(elapsed);
                return Err(load_error(e));
            }
        };

        let mut loaded = loaded
            .into_iter()
            .map(|(key, value)| (key.clone(), self.insert(key, value)))
            .collect::<HashMap<_, _>>();
        for key in missing {
            match loaded.remove(&key) {
                Some(entry) => {
                    res.insert(key, entry);
                }
                None => {
                    self.inner.stats.record_load_exception(elapsed);
                    return Err(Error::new(ErrorKind::InvalidLoadResult, "bulk load omitted a requested key")
                        .with_context("key", format!("{key:?}")));
                }
            }
        }
        self.inner.stats.record_load_success(elapsed);
        Ok(res)
    }
}

/// Publishes a cancellation to the waiters of a flight whose leader unwinds before finishing.
struct LeaderGuard<'a, K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    cache: &'a RawCache<K, V, S>,
    hash: u64,
    key: &'a K,
    id: u64,
    armed: bool,
}

impl<K, V, S> Drop for LeaderGuard<'_, K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn drop(&mut self) {
        if self.armed {
            let e = Error::new(ErrorKind::TaskCancelled, "loading caller unwound before publishing")
                .with_context("key", format!("{:?}", self.key));
            self.cache.fail_load(self.hash, self.key, self.id, &e);
        }
    }
}

/// Owns a reload flight until the refresh task publishes its outcome.
///
/// Waiters of a task dropped before publishing receive a cancellation.
struct RefreshGuard<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    inner: Weak<RawCacheInner<K, V, S>>,
    record: Arc<Record<K, V>>,
    id: u64,
    tx: Option<flume::Sender<bool>>,
    armed: bool,
}

impl<K, V, S> RefreshGuard<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn complete(mut self, res: Result<V>, elapsed: u64) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let installed = RawCache { inner }.commit_refresh(&self.record, self.id, res, elapsed);
        self.armed = false;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(installed);
        }
    }
}

impl<K, V, S> Drop for RefreshGuard<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            let e = Error::new(ErrorKind::TaskCancelled, "refresh task dropped before publishing")
                .with_context("key", format!("{:?}", self.record.key()));
            RawCache { inner }.fail_load(self.record.hash(), self.record.key(), self.id, &e);
        }
    }
}

fn sweep<K, V, S>(weak: Weak<RawCacheInner<K, V, S>>, rx: flume::Receiver<()>, interval: Duration)
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    loop {
        match rx.recv_timeout(interval) {
            Err(flume::RecvTimeoutError::Timeout) => match weak.upgrade() {
                Some(inner) => RawCache { inner }.cleanup(),
                None => return,
            },
            _ => return,
        }
    }
}
