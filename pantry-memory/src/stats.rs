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
    ops::{Add, Sub},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Immutable snapshot of cache statistics.
///
/// All counters are monotonic over the life of a cache. Derived rates are computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a cached value.
    pub hit_count: u64,
    /// Lookups that found no usable value.
    pub miss_count: u64,
    /// Loads that produced a value.
    pub load_success_count: u64,
    /// Loads that failed.
    pub load_exception_count: u64,
    /// Nanoseconds spent loading, successful or not.
    pub total_load_time: u64,
    /// Entries removed by size, expiry or collection.
    pub eviction_count: u64,
}

impl CacheStats {
    /// `hit_count + miss_count`.
    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Ratio of hits to requests, `1.0` with no requests.
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 1.0,
            n => self.hit_count as f64 / n as f64,
        }
    }

    /// Ratio of misses to requests, `0.0` with no requests.
    pub fn miss_rate(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            n => self.miss_count as f64 / n as f64,
        }
    }

    /// `load_success_count + load_exception_count`.
    pub fn load_count(&self) -> u64 {
        self.load_success_count.saturating_add(self.load_exception_count)
    }

    /// Ratio of failed loads to loads, `0.0` with no loads.
    pub fn load_exception_rate(&self) -> f64 {
        match self.load_count() {
            0 => 0.0,
            n => self.load_exception_count as f64 / n as f64,
        }
    }

    /// Mean time per load, zero with no loads.
    pub fn average_load_penalty(&self) -> Duration {
        match self.load_count() {
            0 => Duration::ZERO,
            n => Duration::from_nanos(self.total_load_time / n),
        }
    }

    /// Counters accumulated since `other` was taken. Saturates at zero.
    pub fn minus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_sub(other.hit_count),
            miss_count: self.miss_count.saturating_sub(other.miss_count),
            load_success_count: self.load_success_count.saturating_sub(other.load_success_count),
            load_exception_count: self.load_exception_count.saturating_sub(other.load_exception_count),
            total_load_time: self.total_load_time.saturating_sub(other.total_load_time),
            eviction_count: self.eviction_count.saturating_sub(other.eviction_count),
        }
    }

    /// Sum of two snapshots, e.g. of two caches.
    pub fn plus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_add(other.hit_count),
            miss_count: self.miss_count.saturating_add(other.miss_count),
            load_success_count: self.load_success_count.saturating_add(other.load_success_count),
            load_exception_count: self.load_exception_count.saturating_add(other.load_exception_count),
            total_load_time: self.total_load_time.saturating_add(other.total_load_time),
            eviction_count: self.eviction_count.saturating_add(other.eviction_count),
        }
    }
}

impl Sub for CacheStats {
    type Output = CacheStats;

    fn sub(self, rhs: Self) -> Self::Output {
        self.minus(&rhs)
    }
}

impl Add for CacheStats {
    type Output = CacheStats;

    fn add(self, rhs: Self) -> Self::Output {
        self.plus(&rhs)
    }
}

/// Concurrent accumulator behind [`CacheStats`].
///
/// A disabled counter ignores every record call.
#[derive(Debug, Default)]
pub struct StatsCounter {
    enabled: bool,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    load_success_count: AtomicU64,
    load_exception_count: AtomicU64,
    total_load_time: AtomicU64,
    eviction_count: AtomicU64,
}

impl StatsCounter {
    /// Create a counter.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    /// Record `count` hits.
    pub fn record_hits(&self, count: u64) {
        if self.enabled {
            self.hit_count.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record `count` misses.
    pub fn record_misses(&self, count: u64) {
        if self.enabled {
            self.miss_count.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record a successful load that took `nanos`.
    pub fn record_load_success(&self, nanos: u64) {
        if self.enabled {
            self.load_success_count.fetch_add(1, Ordering::Relaxed);
            self.total_load_time.fetch_add(nanos, Ordering::Relaxed);
        }
    }

    /// Record a failed load that took `nanos`.
    pub fn record_load_exception(&self, nanos: u64) {
        if self.enabled {
            self.load_exception_count.fetch_add(1, Ordering::Relaxed);
            self.total_load_time.fetch_add(nanos, Ordering::Relaxed);
        }
    }

    /// Record an eviction.
    pub fn record_eviction(&self) {
        if self.enabled {
            self.eviction_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a snapshot.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            load_success_count: self.load_success_count.load(Ordering::Relaxed),
            load_exception_count: self.load_exception_count.load(Ordering::Relaxed),
            total_load_time: self.total_load_time.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = CacheStats::default();
        assert_eq!(stats.request_count(), 0);
        assert_eq!(stats.hit_rate(), 1.0);
        assert_eq!(stats.miss_rate(), 0.0);
        assert_eq!(stats.load_exception_rate(), 0.0);
        assert_eq!(stats.average_load_penalty(), Duration::ZERO);
    }

    #[test]
    fn test_counter() {
        let counter = StatsCounter::new(true);
        counter.record_hits(3);
        counter.record_misses(1);
        counter.record_load_success(300);
        counter.record_load_exception(100);
        counter.record_eviction();

        let stats = counter.snapshot();
        assert_eq!(stats.request_count(), 4);
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.miss_rate(), 0.25);
        assert_eq!(stats.load_count(), 2);
        assert_eq!(stats.load_exception_rate(), 0.5);
        assert_eq!(stats.average_load_penalty(), Duration::from_nanos(200));
        assert_eq!(stats.eviction_count, 1);
    }

    #[test]
    fn test_disabled_counter() {
        let counter = StatsCounter::new(false);
        counter.record_hits(3);
        counter.record_misses(3);
        counter.record_load_success(10);
        counter.record_eviction();
        assert_eq!(counter.snapshot(), CacheStats::default());
    }

    #[test]
    fn test_minus_plus() {
        let a = CacheStats {
            hit_count: 10,
            miss_count: 4,
            load_success_count: 3,
            load_exception_count: 1,
            total_load_time: 1000,
            eviction_count: 2,
        };
        let b = CacheStats {
            hit_count: 4,
            miss_count: 5,
            load_success_count: 1,
            load_exception_count: 0,
            total_load_time: 400,
            eviction_count: 2,
        };

        let delta = a.minus(&b);
        assert_eq!(delta.hit_count, 6);
        assert_eq!(delta.miss_count, 0);
        assert_eq!(delta.total_load_time, 600);
        assert_eq!(delta, a - b);

        assert_eq!(a.plus(&b).hit_count, 14);
        assert_eq!(a + b, b + a);
    }
}
