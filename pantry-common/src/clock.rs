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
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

/// A monotonic time source measured in nanoseconds.
///
/// Only differences between two readings are meaningful. The origin is arbitrary.
pub trait Clock: Send + Sync + Debug + 'static {
    /// Current reading in nanoseconds.
    fn now_nanos(&self) -> u64;
}

/// Shared clock handle.
pub type ClockRef = Arc<dyn Clock>;

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    fn origin() -> Instant {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        *ORIGIN.get_or_init(Instant::now)
    }
}

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        duration_nanos(Self::origin().elapsed())
    }
}

/// [`Clock`] that only moves when told to.
///
/// Cloning shares the reading, so a test can keep a handle and advance the clock seen by a cache.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a manual clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.nanos.fetch_add(duration_nanos(duration), Ordering::AcqRel);
    }

    /// Set the absolute reading. Going backwards is allowed but only sensible in tests.
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }
}

/// Nanoseconds of a duration saturated to `u64`.
pub fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock;
        let a = clock.now_nanos();
        std::thread::sleep(Duration::from_millis(1));
        let b = clock.now_nanos();
        assert!(b > a);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new();
        let handle: ClockRef = Arc::new(clock.clone());
        assert_eq!(handle.now_nanos(), 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(handle.now_nanos(), 2_000_000_000);

        clock.set(5);
        assert_eq!(handle.now_nanos(), 5);
    }

    #[test]
    fn test_duration_nanos_saturates() {
        assert_eq!(duration_nanos(Duration::from_millis(3)), 3_000_000);
        assert_eq!(duration_nanos(Duration::MAX), u64::MAX);
    }
}
