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

use std::sync::Arc;

use pantry_common::{
    code::{Key, Value},
    slab::{SlabLinkedList, Token},
    strict_assert,
};
use serde::{Deserialize, Serialize};

use super::{Eviction, Op};
use crate::record::Record;

/// Lru eviction algorithm config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruConfig {}

/// Least recently used eviction.
///
/// The list head is the least recently used record and the tail the most recently used one. Records pushed in the
/// same order keep insertion order as the tie-break.
pub struct Lru<K, V>
where
    K: Key,
    V: Value,
{
    list: SlabLinkedList<Arc<Record<K, V>>>,
}

impl<K, V> Lru<K, V>
where
    K: Key,
    V: Value,
{
    /// Create an empty policy sized for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: SlabLinkedList::with_capacity(capacity),
        }
    }
}

impl<K, V> Eviction<K, V> for Lru<K, V>
where
    K: Key,
    V: Value,
{
    fn push(&mut self, record: Arc<Record<K, V>>) -> Token {
        strict_assert!(!record.is_in_eviction());
        record.set_in_eviction(true);
        self.list.push_back(record)
    }

    fn pop(&mut self) -> Option<Arc<Record<K, V>>> {
        let record = self.list.pop_front()?;
        strict_assert!(record.is_in_eviction());
        record.set_in_eviction(false);
        Some(record)
    }

    fn peek(&self) -> Option<&Arc<Record<K, V>>> {
        self.list.front()
    }

    fn access(&mut self, token: Token) {
        self.list.move_to_back(token);
    }

    fn remove(&mut self, token: Token) -> Option<Arc<Record<K, V>>> {
        let record = self.list.remove(token)?;
        record.set_in_eviction(false);
        Some(record)
    }

    fn clear(&mut self) -> Vec<Arc<Record<K, V>>> {
        let records = self.list.drain();
        records.iter().for_each(|r| r.set_in_eviction(false));
        records
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn acquire(&self) -> Op {
        Op::Mutable
    }
}
