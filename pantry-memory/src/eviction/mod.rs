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
    slab::Token,
};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Lock mode a policy needs on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Reads do not reorder the policy, a shared lock is enough.
    Immutable,
    /// Reads reorder the policy and need the exclusive lock.
    Mutable,
}

/// Cache eviction algorithm abstraction.
///
/// The policy owns one `Arc` of every record it tracks and addresses it by the [`Token`] returned from
/// [`Eviction::push`]. The caller keeps the token next to the record in the indexer.
pub trait Eviction<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    /// Start tracking a record as the most recently used one.
    fn push(&mut self, record: Arc<Record<K, V>>) -> Token;

    /// Stop tracking and return the next eviction victim.
    fn pop(&mut self) -> Option<Arc<Record<K, V>>>;

    /// Peek the next eviction victim.
    fn peek(&self) -> Option<&Arc<Record<K, V>>>;

    /// Notify the policy of a read.
    fn access(&mut self, token: Token);

    /// Stop tracking the record addressed by `token`.
    fn remove(&mut self, token: Token) -> Option<Arc<Record<K, V>>>;

    /// Stop tracking all records.
    fn clear(&mut self) -> Vec<Arc<Record<K, V>>>;

    /// Number of tracked records.
    fn len(&self) -> usize;

    /// Returns `true` if no record is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock mode required by [`Eviction::access`].
    ///
    /// A policy that returns [`Op::Mutable`] keeps its records in access order, so its victim is also the entry idle
    /// for the longest time.
    fn acquire(&self) -> Op;
}

/// Eviction algorithm config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionConfig {
    /// Least recently used.
    #[default]
    Lru,
    /// First in, first out.
    Fifo,
}

impl From<LruConfig> for EvictionConfig {
    fn from(_: LruConfig) -> Self {
        Self::Lru
    }
}

impl From<FifoConfig> for EvictionConfig {
    fn from(_: FifoConfig) -> Self {
        Self::Fifo
    }
}

impl EvictionConfig {
    /// Build one policy instance for a shard.
    pub fn build<K, V>(&self, capacity: usize) -> Box<dyn Eviction<K, V>>
    where
        K: Key,
        V: Value,
    {
        match self {
            EvictionConfig::Lru => Box::new(Lru::with_capacity(capacity)),
            EvictionConfig::Fifo => Box::new(Fifo::with_capacity(capacity)),
        }
    }
}

pub mod fifo;
pub mod lru;

pub use fifo::{Fifo, FifoConfig};
pub use lru::{Lru, LruConfig};
