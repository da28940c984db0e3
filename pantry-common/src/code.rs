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

use std::hash::{BuildHasher, Hash};

/// Key trait for the cache.
///
/// Keys are cloned into the indexer, so cheap clones (`Arc<str>`, integers, small strings) are preferred.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + std::fmt::Debug {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone + std::fmt::Debug> Key for T {}

/// Value trait for the cache.
///
/// Values are shared behind an `Arc` and never cloned by the cache.
pub trait Value: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Value for T {}

/// Hash builder trait.
pub trait HashBuilder: BuildHasher + Send + Sync + 'static {}
impl<T> HashBuilder for T where T: BuildHasher + Send + Sync + 'static {}

/// The default hash builder used by the cache.
pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
