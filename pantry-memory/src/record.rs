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
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use pantry_common::code::{Key, Value};

use crate::reference::{Referent, Strength};

bitflags! {
    /// Atomic state bits of a [`Record`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flags: u64 {
        /// The record is addressed by the indexer.
        const IN_INDEXER = 0b00000001;
        /// The record is linked in the eviction order.
        const IN_EVICTION = 0b00000010;
    }
}

/// Everything needed to build a [`Record`].
pub struct Data<K, V> {
    /// Owned copy of the key, used for hashing and equality.
    pub key: K,
    /// The key as handed out to callers.
    pub key_ref: Arc<K>,
    /// The value as handed out to callers.
    pub value: Arc<V>,
    /// Hash of `key`.
    pub hash: u64,
    /// Weight computed once by the weigher.
    pub weight: usize,
    /// Clock reading at insertion.
    pub now: u64,
}

/// [`Record`] holds the information of a cached entry.
///
/// A record never changes its key or value. Writes install a new record, so the write time is fixed at creation while
/// the access time moves with every read.
pub struct Record<K, V> {
    key: K,
    key_ref: Referent<K>,
    value: Referent<V>,
    hash: u64,
    weight: usize,
    write_time: u64,
    access_time: AtomicU64,
    flags: AtomicU64,
}

impl<K, V> Debug for Record<K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("hash", &self.hash)
            .field("weight", &self.weight)
            .field("write_time", &self.write_time)
            .field("access_time", &self.access_time.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> Record<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a record holding the key and the value with the given strengths.
    pub fn new(data: Data<K, V>, key_strength: Strength, value_strength: Strength) -> Self {
        Self {
            key_ref: Referent::new(key_strength, &data.key_ref),
            value: Referent::new(value_strength, &data.value),
            key: data.key,
            hash: data.hash,
            weight: data.weight,
            write_time: data.now,
            access_time: AtomicU64::new(data.now),
            flags: AtomicU64::new(0),
        }
    }

    /// Get the immutable reference of the record key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Get the key handle if the key has not been collected.
    pub fn key_ref(&self) -> Option<Arc<K>> {
        self.key_ref.get()
    }

    /// Get the value if it has not been collected.
    pub fn value(&self) -> Option<Arc<V>> {
        self.value.get()
    }

    /// Returns `true` if both the key and the value are still reachable.
    pub fn is_live(&self) -> bool {
        self.key_ref.is_live() && self.value.is_live()
    }

    /// Drop the owned reference to a soft value nobody else holds.
    pub fn reclaim(&self) -> bool {
        self.value.reclaim()
    }

    /// Get the record hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Get the record weight.
    pub fn weight(&self) -> usize {
        self.weight
    }

    /// Clock reading when the record was written.
    pub fn write_time(&self) -> u64 {
        self.write_time
    }

    /// Clock reading of the last read or write.
    pub fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Acquire)
    }

    /// Move the access time forward.
    pub fn set_access_time(&self, now: u64) {
        self.access_time.fetch_max(now, Ordering::AcqRel);
    }

    /// Set in eviction flag.
    pub fn set_in_eviction(&self, val: bool) {
        self.set_flags(Flags::IN_EVICTION, val, Ordering::Release);
    }

    /// Get in eviction flag.
    pub fn is_in_eviction(&self) -> bool {
        self.get_flags(Flags::IN_EVICTION, Ordering::Acquire)
    }

    /// Set in indexer flag.
    pub fn set_in_indexer(&self, val: bool) {
        self.set_flags(Flags::IN_INDEXER, val, Ordering::Release);
    }

    /// Get in indexer flag.
    pub fn is_in_indexer(&self) -> bool {
        self.get_flags(Flags::IN_INDEXER, Ordering::Acquire)
    }

    /// Set the record atomic flags.
    pub fn set_flags(&self, flags: Flags, val: bool, order: Ordering) {
        match val {
            true => self.flags.fetch_or(flags.bits(), order),
            false => self.flags.fetch_and(!flags.bits(), order),
        };
    }

    /// Get the record atomic flags.
    pub fn get_flags(&self, flags: Flags, order: Ordering) -> bool {
        self.flags.load(order) & flags.bits() == flags.bits()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn record(key: u64, value: u64, now: u64) -> Arc<Record<u64, u64>> {
        record_with(key, Arc::new(value), now, Strength::Strong)
    }

    pub fn record_with(key: u64, value: Arc<u64>, now: u64, value_strength: Strength) -> Arc<Record<u64, u64>> {
        Arc::new(Record::new(
            Data {
                key,
                key_ref: Arc::new(key),
                value,
                hash: key,
                weight: 1,
                now,
            },
            Strength::Strong,
            value_strength,
        ))
    }

    #[test]
    fn test_record_times() {
        let r = record(1, 10, 100);
        assert_eq!(r.write_time(), 100);
        assert_eq!(r.access_time(), 100);

        r.set_access_time(150);
        assert_eq!(r.access_time(), 150);
        // Access time never goes backwards.
        r.set_access_time(120);
        assert_eq!(r.access_time(), 150);
        assert_eq!(r.write_time(), 100);
    }

    #[test]
    fn test_record_flags() {
        let r = record(1, 10, 0);
        assert!(!r.is_in_indexer());
        r.set_in_indexer(true);
        r.set_in_eviction(true);
        assert!(r.is_in_indexer());
        assert!(r.is_in_eviction());
        r.set_in_indexer(false);
        assert!(!r.is_in_indexer());
        assert!(r.is_in_eviction());
    }

    #[test]
    fn test_record_debug() {
        let r = record(7, 70, 3);
        r.set_access_time(9);
        assert_eq!(
            format!("{r:?}"),
            "Record { key: 7, hash: 7, weight: 1, write_time: 3, access_time: 9 }"
        );
    }

    #[test]
    fn test_record_weak_value() {
        let value = Arc::new(5);
        let r = record_with(1, value.clone(), 0, Strength::Weak);
        assert!(r.is_live());
        assert_eq!(r.value().as_deref(), Some(&5));
        drop(value);
        assert!(!r.is_live());
        assert!(r.value().is_none());
        assert_eq!(r.key(), &1);
    }
}
