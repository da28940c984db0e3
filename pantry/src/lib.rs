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

//! A concurrent in-memory loading cache.
//!
//! ```rust
//! use pantry::{CacheBuilder, RemovalNotification};
//!
//! let cache = CacheBuilder::from_spec_str("maximumSize=2,recordStats")
//!     .unwrap()
//!     .with_removal_listener(|n: RemovalNotification<String, usize>| println!("{:?} removed: {:?}", n.key(), n.cause()))
//!     .build_with_loader(|key: &String| Ok::<_, std::io::Error>(key.len()))
//!     .unwrap();
//!
//! assert_eq!(*cache.get(&"pantry".to_string()).unwrap(), 6);
//! assert_eq!(cache.stats().miss_count, 1);
//! ```

pub use pantry_common as common;
pub use pantry_memory as memory;

mod prelude;
pub use prelude::*;
