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

//! Shared components for pantry.

/// Assertion macros that can be hardened with the `strict_assertions` feature.
pub mod assert;
/// Time sources for expiration.
pub mod clock;
/// Key and value bounds.
pub mod code;
/// The error type shared by all pantry crates.
pub mod error;
/// Removal causes and removal listeners.
pub mod event;
/// A token-addressed slab and a linked list built on it.
pub mod slab;
/// Runtime wrappers for background tasks.
pub mod spawn;
