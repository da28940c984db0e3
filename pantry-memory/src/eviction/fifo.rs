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
};
use serde::{Deserialize, Serialize};

use super::{Eviction, Op};
use crate::record::Record;

/// Fifo eviction algorithm config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoConfig {}

/// First in, first out eviction. Reads never reorder it.
pub struct Fifo<K, V>
where
    K: Key,
    V: Value,
{
    queue: SlabLinkedList<Arc<Record<K, V>>>,
}

impl<K, V> Fifo<K, V>
where
    K: Key,
    V: Value,
{
    /// Create an empty policy sized for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: SlabLinkedList::with_capacity(capacity),
        }
    }
}

impl<K, V> Eviction<K, V> for Fifo<K, V>
where
    K: Key,
    V: Value,
{
    fn push(&mut self, record: Arc<Record<K, V>>) -> Token {
        record.set_in_eviction(true);
        self.queue.push_back(record)
    }

    fn pop(&mut self) -> Option<Arc<Record<K, V>>> {
        let record = self.queue.pop_front()?;
        record.set_in_eviction(false);
        Some(record)
    }

    fn peek(&self) -> Option<&Arc<Record<K, V>>> {
        self.queue.front()
    }

    fn access(&mut self, _: Token) {}

    fn remove(&mut self, token: Token) -> Option<Arc<Record<K, V>>> {
        let record = self.queue.remove(token)?;
        record.set_in_eviction(false);
        Some(record)
    }

    fn clear(&mut self) -> Vec<Arc<Record<K, V>>> {
        let records = self.queue.drain();
        records.iter().for_each(|r| r.set_in_eviction(false));
        records
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn acquire(&self) -> Op {
        Op::Immutable
    }
}
