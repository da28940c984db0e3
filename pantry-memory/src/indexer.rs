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

use std::{hash::Hash, sync::Arc};

use equivalent::Equivalent;
use hashbrown::hash_table::{Entry as HashTableEntry, HashTable};
use pantry_common::{
    code::{Key, Value},
    slab::Token,
    strict_assert,
};

use crate::record::Record;

/// A record together with its positions in the shard orders.
pub struct Slot<K, V> {
    /// The indexed record.
    pub record: Arc<Record<K, V>>,
    /// Position in the eviction policy.
    pub eviction: Token,
    /// Position in the access queue, if the shard keeps one.
    pub access: Option<Token>,
    /// Position in the write queue, if the shard keeps one.
    pub write: Option<Token>,
}

/// Hash table keyed by the record key with a precomputed hash.
pub struct HashTableIndexer<K, V> {
    table: HashTable<Slot<K, V>>,
}

impl<K, V> Default for HashTableIndexer<K, V> {
    fn default() -> Self {
        Self {
            table: HashTable::new(),
        }
    }
}

impl<K, V> HashTableIndexer<K, V>
where
    K: Key,
    V: Value,
{
    /// Create an indexer pre-sized for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
        }
    }

    /// Insert a slot, returning the slot it replaces.
    pub fn insert(&mut self, mut slot: Slot<K, V>) -> Option<Slot<K, V>> {
        strict_assert!(!slot.record.is_in_indexer());
        slot.record.set_in_indexer(true);

        let hash = slot.record.hash();
        match self
            .table
            .entry(hash, |s| s.record.key() == slot.record.key(), |s| s.record.hash())
        {
            HashTableEntry::Occupied(mut o) => {
                std::mem::swap(o.get_mut(), &mut slot);
                slot.record.set_in_indexer(false);
                Some(slot)
            }
            HashTableEntry::Vacant(v) => {
                v.insert(slot);
                None
            }
        }
    }

    /// Find a slot.
    pub fn get<Q>(&self, hash: u64, key: &Q) -> Option<&Slot<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.table.find(hash, |s| key.equivalent(s.record.key()))
    }

    /// Remove a slot.
    pub fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<Slot<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self
            .table
            .entry(hash, |s| key.equivalent(s.record.key()), |s| s.record.hash())
        {
            HashTableEntry::Occupied(o) => {
                let (slot, _) = o.remove();
                slot.record.set_in_indexer(false);
                Some(slot)
            }
            HashTableEntry::Vacant(_) => None,
        }
    }

    /// Remove the slot only if it still indexes `record`.
    pub fn remove_record(&mut self, record: &Arc<Record<K, V>>) -> Option<Slot<K, V>> {
        let current = self
            .get(record.hash(), record.key())
            .is_some_and(|slot| Arc::ptr_eq(&slot.record, record));
        if current {
            self.remove(record.hash(), record.key())
        } else {
            None
        }
    }

    /// Remove every slot.
    pub fn drain(&mut self) -> impl Iterator<Item = Slot<K, V>> + '_ {
        self.table.drain().inspect(|slot| slot.record.set_in_indexer(false))
    }

    /// Iterate over all slots.
    pub fn iter(&self) -> impl Iterator<Item = &Slot<K, V>> {
        self.table.iter()
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if nothing is indexed.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::record::tests::record;

    fn slot(record: Arc<Record<u64, u64>>, token: Token) -> Slot<u64, u64> {
        Slot {
            record,
            eviction: token,
            access: None,
            write: None,
        }
    }

    #[test]
    fn test_indexer() {
        let mut slab = pantry_common::slab::Slab::new();
        let tokens = (0..10).map(|_| slab.insert(())).collect_vec();
        let mut indexer = HashTableIndexer::with_capacity(4);
        let rs = (0..4).map(|i| record(i, i * 10, 0)).collect_vec();
        for (i, r) in rs.iter().enumerate() {
            assert!(indexer.insert(slot(r.clone(), tokens[i])).is_none());
        }
        assert_eq!(indexer.len(), 4);
        assert!(rs.iter().all(|r| r.is_in_indexer()));

        let replacement = record(2, 200, 1);
        let old = indexer.insert(slot(replacement.clone(), tokens[9])).unwrap();
        assert!(Arc::ptr_eq(&old.record, &rs[2]));
        assert!(!rs[2].is_in_indexer());
        assert_eq!(indexer.len(), 4);

        let found = indexer.get(2, &2).unwrap();
        assert!(Arc::ptr_eq(&found.record, &replacement));
        assert_eq!(found.eviction.index(), 9);

        // A stale record does not remove its replacement.
        assert!(indexer.remove_record(&rs[2]).is_none());
        assert!(indexer.remove_record(&replacement).is_some());
        assert!(indexer.get(2, &2).is_none());

        assert!(indexer.remove(0, &0).is_some());
        assert!(indexer.remove(0, &0).is_none());

        let drained = indexer.drain().map(|s| *s.record.key()).sorted().collect_vec();
        assert_eq!(drained, vec![1, 3]);
        assert!(indexer.is_empty());
        assert!(rs.iter().all(|r| !r.is_in_indexer()));
    }
}
