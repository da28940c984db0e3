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

//! In-memory concurrent loading cache engine for pantry.
//!
//! Entries live in hash-sharded stores guarded by `RwLock`s. Each shard keeps a hash table indexer, an eviction
//! order and optional write and access queues for expiration. Misses of the same key share a single load through
//! the per-shard inflight map, and removals are reported to listeners after the shard lock is released.

mod cache;
mod eviction;
mod expiry;
mod indexer;
mod inflight;
mod listener;
mod loader;
mod prelude;
mod raw;
mod record;
mod reference;
mod spec;
mod stats;

pub use prelude::*;
