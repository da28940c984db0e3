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

use std::hash::Hash;

use equivalent::Equivalent;
use hashbrown::hash_map::{Entry as HashMapEntry, HashMap};
use pantry_common::{
    code::{Key, Value},
    error::Result,
};

use crate::raw::CacheEntry;

/// Sender half handed the outcome of a load.
pub type Notifier<K, V> = flume::Sender<Result<CacheEntry<K, V>>>;
/// Receiver half a waiting caller blocks on.
pub type Waiter<K, V> = flume::Receiver<Result<CacheEntry<K, V>>>;

/// Outcome of joining the load of a key.
pub enum Enqueue<K, V> {
    /// The caller runs the load. The id identifies the flight on completion.
    Lead(u64),
    /// Another caller runs the load.
    Wait(Waiter<K, V>),
}

struct Flight<K, V> {
    id: u64,
    notifiers: Vec<Notifier<K, V>>,
    superseded: bool,
}

/// What the leader of a flight must do on completion.
pub struct Completion<K, V> {
    /// Callers waiting on the flight.
    pub notifiers: Vec<Notifier<K, V>>,
    /// A write replaced the key while loading, the loaded value must not be installed.
    pub superseded: bool,
}

/// Loads in flight for the keys of one shard.
///
/// At most one flight exists per key. Later callers register a notifier on it and receive the leader's outcome.
pub struct InflightMap<K, V> {
    flights: HashMap<K, Flight<K, V>>,
    next_id: u64,
}

impl<K, V> Default for InflightMap<K, V> {
    fn default() -> Self {
        Self {
            flights: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<K, V> InflightMap<K, V>
where
    K: Key,
    V: Value,
{
    /// Lead a new flight for `key` or wait on the existing one.
    pub fn enqueue(&mut self, key: &K) -> Enqueue<K, V> {
        match self.flights.entry(key.clone()) {
            HashMapEntry::Vacant(v) => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                v.insert(Flight {
                    id,
                    notifiers: vec![],
                    superseded: false,
                });
                Enqueue::Lead(id)
            }
            HashMapEntry::Occupied(mut o) => {
                let (tx, rx) = flume::bounded(1);
                o.get_mut().notifiers.push(tx);
                Enqueue::Wait(rx)
            }
        }
    }

    /// Mark the flight of `key` as replaced by a write.
    ///
    /// Returns `true` if a flight exists.
    pub fn supersede<Q>(&mut self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.flights.get_mut(key) {
            Some(flight) => {
                flight.superseded = true;
                true
            }
            None => false,
        }
    }

    /// Finish the flight `id` of `key`.
    ///
    /// Returns `None` if the flight has already been completed.
    pub fn complete<Q>(&mut self, key: &Q, id: u64) -> Option<Completion<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.flights.get(key) {
            Some(flight) if flight.id == id => {}
            _ => return None,
        }
        self.flights.remove(key).map(|flight| Completion {
            notifiers: flight.notifiers,
            superseded: flight.superseded,
        })
    }

    /// Returns `true` if `key` is being loaded.
    #[cfg(test)]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.flights.contains_key(key)
    }

    /// Number of keys being loaded.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    /// Returns `true` if nothing is being loaded.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}
