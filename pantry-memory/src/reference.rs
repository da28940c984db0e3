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
    sync::{Arc, Weak},
};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

/// How strongly the cache holds a key or a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strength {
    /// The cache owns the referent.
    #[default]
    Strong,
    /// The referent lives only while a caller holds it.
    Weak,
    /// The cache owns the referent until [`crate::Cache::reclaim_soft`] drops it for memory pressure.
    Soft,
}

/// A key or value held by a record with a given [`Strength`].
pub enum Referent<T> {
    /// Owned.
    Strong(Arc<T>),
    /// Borrowed from callers.
    Weak(Weak<T>),
    /// Owned until reclaimed, then borrowed from callers.
    Soft {
        /// Cleared by [`Referent::reclaim`].
        strong: ArcSwapOption<T>,
        /// Keeps the referent reachable while callers still hold it.
        weak: Weak<T>,
    },
}

impl<T> Debug for Referent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strength = match self {
            Referent::Strong(_) => Strength::Strong,
            Referent::Weak(_) => Strength::Weak,
            Referent::Soft { .. } => Strength::Soft,
        };
        f.debug_struct("Referent")
            .field("strength", &strength)
            .field("live", &self.is_live())
            .finish()
    }
}

impl<T> Referent<T> {
    /// Hold `referent` with `strength`.
    pub fn new(strength: Strength, referent: &Arc<T>) -> Self {
        match strength {
            Strength::Strong => Self::Strong(referent.clone()),
            Strength::Weak => Self::Weak(Arc::downgrade(referent)),
            Strength::Soft => Self::Soft {
                strong: ArcSwapOption::from(Some(referent.clone())),
                weak: Arc::downgrade(referent),
            },
        }
    }

    /// Get the referent if it has not been collected.
    pub fn get(&self) -> Option<Arc<T>> {
        match self {
            Referent::Strong(arc) => Some(arc.clone()),
            Referent::Weak(weak) => weak.upgrade(),
            Referent::Soft { strong, weak } => strong.load_full().or_else(|| weak.upgrade()),
        }
    }

    /// Returns `true` if the referent is still reachable.
    pub fn is_live(&self) -> bool {
        match self {
            Referent::Strong(_) => true,
            Referent::Weak(weak) => weak.strong_count() > 0,
            Referent::Soft { weak, .. } => weak.strong_count() > 0,
        }
    }

    /// Drop the owned reference of a soft referent that nobody else holds.
    ///
    /// Returns `true` if the referent is collected by this call.
    pub fn reclaim(&self) -> bool {
        let Referent::Soft { strong, weak } = self else {
            return false;
        };
        let Some(current) = strong.load_full() else {
            return false;
        };
        // One count for the record, one for `current`.
        if Arc::strong_count(&current) > 2 {
            return false;
        }
        strong.store(None);
        drop(current);
        weak.strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_referent() {
        let value = Arc::new(42u64);
        let referent = Referent::new(Strength::Strong, &value);
        drop(value);
        assert!(referent.is_live());
        assert_eq!(referent.get().as_deref(), Some(&42));
        assert!(!referent.reclaim());
    }

    #[test]
    fn test_weak_referent() {
        let value = Arc::new("v".to_string());
        let referent = Referent::new(Strength::Weak, &value);
        assert!(referent.is_live());
        assert_eq!(referent.get().as_deref().map(String::as_str), Some("v"));

        drop(value);
        assert!(!referent.is_live());
        assert!(referent.get().is_none());
    }

    #[test]
    fn test_soft_referent_reclaim() {
        let value = Arc::new(vec![1u8; 16]);
        let referent = Referent::new(Strength::Soft, &value);

        // Held by a caller, cannot be collected.
        assert!(!referent.reclaim());
        assert!(referent.is_live());

        drop(value);
        assert!(referent.is_live());
        assert!(referent.reclaim());
        assert!(!referent.is_live());
        assert!(referent.get().is_none());
        assert!(!referent.reclaim());
    }

    #[test]
    fn test_soft_referent_survives_while_borrowed() {
        let value = Arc::new(7u32);
        let referent = Referent::new(Strength::Soft, &value);
        drop(value);

        let borrowed = referent.get().unwrap();
        assert!(!referent.reclaim());
        drop(borrowed);
        assert!(referent.reclaim());
    }
}
