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

use std::time::Duration;

use pantry_common::{
    clock::duration_nanos,
    code::{Key, Value},
};

use crate::record::Record;

/// Staleness of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve as is.
    Fresh,
    /// Serve as is and reload in the background.
    RefreshDue,
    /// Treat as absent.
    Expired,
}

/// Idle, write and refresh windows of a cache, in clock nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
    expire_after_access: Option<u64>,
    expire_after_write: Option<u64>,
    refresh_after_write: Option<u64>,
}

impl ExpirationPolicy {
    /// Create a policy from optional windows.
    pub fn new(
        expire_after_access: Option<Duration>,
        expire_after_write: Option<Duration>,
        refresh_after_write: Option<Duration>,
    ) -> Self {
        Self {
            expire_after_access: expire_after_access.map(duration_nanos),
            expire_after_write: expire_after_write.map(duration_nanos),
            refresh_after_write: refresh_after_write.map(duration_nanos),
        }
    }

    /// Returns `true` if idle expiry is enabled.
    pub fn expires_after_access(&self) -> bool {
        self.expire_after_access.is_some()
    }

    /// Returns `true` if write expiry is enabled.
    pub fn expires_after_write(&self) -> bool {
        self.expire_after_write.is_some()
    }

    /// Returns `true` if refresh is enabled.
    pub fn refreshes(&self) -> bool {
        self.refresh_after_write.is_some()
    }

    /// Returns `true` if the idle window of the record has elapsed.
    pub fn is_expired_by_access<K: Key, V: Value>(&self, record: &Record<K, V>, now: u64) -> bool {
        elapsed(record.access_time(), self.expire_after_access, now)
    }

    /// Returns `true` if the write window of the record has elapsed.
    pub fn is_expired_by_write<K: Key, V: Value>(&self, record: &Record<K, V>, now: u64) -> bool {
        elapsed(record.write_time(), self.expire_after_write, now)
    }

    /// Returns `true` if either window has elapsed.
    pub fn is_expired<K: Key, V: Value>(&self, record: &Record<K, V>, now: u64) -> bool {
        self.is_expired_by_access(record, now) || self.is_expired_by_write(record, now)
    }

    /// Classify the record at `now`.
    pub fn classify<K: Key, V: Value>(&self, record: &Record<K, V>, now: u64) -> Freshness {
        if self.is_expired(record, now) {
            Freshness::Expired
        } else if elapsed(record.write_time(), self.refresh_after_write, now) {
            Freshness::RefreshDue
        } else {
            Freshness::Fresh
        }
    }
}

fn elapsed(since: u64, window: Option<u64>, now: u64) -> bool {
    match window {
        Some(window) => now.saturating_sub(since) >= window,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::record;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn test_no_windows() {
        let policy = ExpirationPolicy::default();
        let r = record(1, 1, 0);
        assert_eq!(policy.classify(&r, u64::MAX), Freshness::Fresh);
    }

    #[test]
    fn test_write_window() {
        let policy = ExpirationPolicy::new(None, Some(Duration::from_secs(2)), None);
        let r = record(1, 1, 0);
        assert_eq!(policy.classify(&r, SEC), Freshness::Fresh);
        r.set_access_time(SEC);
        assert_eq!(policy.classify(&r, 2 * SEC), Freshness::Expired);
        assert_eq!(policy.classify(&r, 3 * SEC), Freshness::Expired);
    }

    #[test]
    fn test_access_window() {
        let policy = ExpirationPolicy::new(Some(Duration::from_secs(2)), None, None);
        let r = record(1, 1, 0);
        r.set_access_time(SEC);
        assert_eq!(policy.classify(&r, 2 * SEC), Freshness::Fresh);
        assert!(!policy.is_expired_by_write(&r, 100 * SEC));
        assert_eq!(policy.classify(&r, 3 * SEC), Freshness::Expired);
    }

    #[test]
    fn test_refresh_window() {
        let policy = ExpirationPolicy::new(None, Some(Duration::from_secs(10)), Some(Duration::from_secs(1)));
        let r = record(1, 1, 0);
        assert_eq!(policy.classify(&r, SEC / 2), Freshness::Fresh);
        assert_eq!(policy.classify(&r, SEC), Freshness::RefreshDue);
        assert_eq!(policy.classify(&r, 9 * SEC), Freshness::RefreshDue);
        assert_eq!(policy.classify(&r, 10 * SEC), Freshness::Expired);
    }
}
