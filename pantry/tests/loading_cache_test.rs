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

//! End-to-end scenarios for the pantry loading cache.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use itertools::Itertools;
use pantry::{
    CacheBuilder, CacheSpec, ErrorKind, Loader, ManualClock, Reload, RemovalCause, RemovalNotification, Strength,
};
use parking_lot::Mutex;

type Removals = Arc<Mutex<Vec<(String, Option<u64>, RemovalCause)>>>;

fn recorder() -> (Removals, impl Fn(RemovalNotification<String, u64>) + Send + Sync + 'static) {
    let removals: Removals = Arc::default();
    let r = removals.clone();
    let listener = move |n: RemovalNotification<String, u64>| {
        let (key, value, cause) = n.into_parts();
        r.lock().push((key, value.map(|v| *v), cause));
    };
    (removals, listener)
}

/// Loads `len(key)` and counts invocations.
#[derive(Default)]
struct LenLoader {
    loads: AtomicU64,
    delay: Duration,
}

impl Loader<String, u64> for LenLoader {
    fn load(&self, key: &String) -> anyhow::Result<u64> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if key.is_empty() {
            anyhow::bail!("empty key");
        }
        Ok(key.len() as u64)
    }
}

#[test_log::test]
fn test_scenario_lru_eviction() {
    let (removals, listener) = recorder();
    let cache = CacheBuilder::from_spec_str("maximumSize=2")
        .unwrap()
        .with_removal_listener(listener)
        .build()
        .unwrap();

    cache.put("a".to_string(), 1);
    cache.put("b".to_string(), 2);
    assert_eq!(*cache.get_if_present("a").unwrap(), 1);
    cache.put("c".to_string(), 3);

    assert_eq!(cache.size(), 2);
    assert!(cache.get_if_present("b").is_none());
    assert_eq!(*cache.get_if_present("a").unwrap(), 1);
    assert_eq!(*cache.get_if_present("c").unwrap(), 3);
    assert_eq!(
        removals.lock().clone(),
        vec![("b".to_string(), Some(2), RemovalCause::Size)]
    );
}

#[test_log::test]
fn test_scenario_write_expiry() {
    let clock = ManualClock::new();
    let (removals, listener) = recorder();
    let cache = CacheBuilder::from_spec_str("expireAfterWrite=10s,recordStats")
        .unwrap()
        .with_clock(clock.clone())
        .with_removal_listener(listener)
        .build_with_loader(LenLoader::default())
        .unwrap();
    let key = "pantry".to_string();

    assert_eq!(*cache.get(&key).unwrap(), 6);
    clock.advance(Duration::from_secs(9));
    assert_eq!(*cache.get(&key).unwrap(), 6);
    clock.advance(Duration::from_secs(1));
    // Expired entries are never served.
    assert!(cache.get_if_present(&key).is_none());
    assert_eq!(*cache.get(&key).unwrap(), 6);

    let stats = cache.stats();
    assert_eq!(stats.load_count(), 2);
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 3);
    assert_eq!(stats.eviction_count, 1);
    assert_eq!(removals.lock().clone(), vec![(key, Some(6), RemovalCause::Expired)]);
}

#[test_log::test]
fn test_scenario_no_negative_caching() {
    let loader = Arc::new(LenLoader::default());
    let l = loader.clone();
    let cache = CacheBuilder::new()
        .with_record_stats(true)
        .build_with_loader(move |k: &String| l.load(k))
        .unwrap();

    for _ in 0..3 {
        let err = cache.get(&String::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.source().unwrap().to_string(), "empty key");
    }
    assert_eq!(loader.loads.load(Ordering::SeqCst), 3);
    assert_eq!(cache.size(), 0);

    let stats = cache.stats();
    assert_eq!(stats.load_exception_count, 3);
    assert_eq!(stats.load_exception_rate(), 1.0);
}

struct VersionLoader {
    version: AtomicU64,
    reloads: AtomicU64,
}

impl Loader<String, u64> for VersionLoader {
    fn load(&self, _: &String) -> anyhow::Result<u64> {
        Ok(self.version.load(Ordering::SeqCst))
    }

    fn reload(&self, _: &String, _: &u64) -> Reload<u64> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        let version = self.version.load(Ordering::SeqCst);
        Reload::future(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(version)
        })
    }
}

#[test_log::test]
fn test_scenario_refresh_serves_stale_and_reloads_once() {
    let clock = ManualClock::new();
    let loader = Arc::new(VersionLoader {
        version: AtomicU64::new(1),
        reloads: AtomicU64::new(0),
    });

    struct Shared(Arc<VersionLoader>);
    impl Loader<String, u64> for Shared {
        fn load(&self, key: &String) -> anyhow::Result<u64> {
            self.0.load(key)
        }

        fn reload(&self, key: &String, old: &u64) -> Reload<u64> {
            self.0.reload(key, old)
        }
    }

    let cache = CacheBuilder::from_spec_str("refreshAfterWrite=1s,expireAfterWrite=1h")
        .unwrap()
        .with_clock(clock.clone())
        .build_with_loader(Shared(loader.clone()))
        .unwrap();
    let key = "k".to_string();

    assert_eq!(*cache.get(&key).unwrap(), 1);
    loader.version.store(2, Ordering::SeqCst);
    clock.advance(Duration::from_secs(2));

    // Every read during the reload gets the stale value and none starts another reload.
    for _ in 0..10 {
        assert_eq!(*cache.get(&key).unwrap(), 1);
    }

    let start = Instant::now();
    while *cache.get(&key).unwrap() != 2 {
        assert!(start.elapsed() < Duration::from_secs(10), "refresh did not finish");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(loader.reloads.load(Ordering::SeqCst), 1);
}

#[test_log::test]
fn test_single_flight_across_threads() {
    const CALLERS: usize = 32;

    let loader = Arc::new(LenLoader {
        loads: AtomicU64::new(0),
        delay: Duration::from_millis(100),
    });
    let l = loader.clone();
    let cache = CacheBuilder::new()
        .with_record_stats(true)
        .build_with_loader(move |k: &String| l.load(k))
        .unwrap();
    let barrier = Arc::new(Barrier::new(CALLERS));

    let values = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                *cache.get(&"single".to_string()).unwrap()
            })
        })
        .collect_vec()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect_vec();

    assert!(values.iter().all(|v| *v == 6));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().request_count(), CALLERS as u64);
}

#[test_log::test]
fn test_count_bound_under_concurrency() {
    const THREADS: u64 = 8;
    const KEYS: u64 = 1000;

    let cache = CacheBuilder::from_spec_str("maximumSize=100,concurrencyLevel=4")
        .unwrap()
        .build_with_loader(|k: &u64| Ok::<_, std::io::Error>(*k))
        .unwrap();

    (0..THREADS)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for k in 0..KEYS {
                    let key = (k * 7 + t) % KEYS;
                    assert_eq!(*cache.get(&key).unwrap(), key);
                }
            })
        })
        .collect_vec()
        .into_iter()
        .for_each(|h| h.join().unwrap());

    assert!(cache.size() <= 100);
    assert!(cache.weighted_size() <= 100);
}

#[test]
fn test_spec_round_trip() {
    let spec: CacheSpec = "maximumSize=200,expireAfterWrite=2m,weakKeys,softValues,recordStats"
        .parse()
        .unwrap();
    assert_eq!(spec.maximum_size, Some(200));
    assert_eq!(spec.expire_after_write, Some(Duration::from_secs(120)));
    assert_eq!(spec.key_strength, Some(Strength::Weak));
    assert_eq!(spec.value_strength, Some(Strength::Soft));
    assert_eq!(spec.to_spec_string().parse::<CacheSpec>().unwrap(), spec);

    let err = "maximumSize=1,maximumSize=2".parse::<CacheSpec>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    let err = "expireAfterWrite=forever".parse::<CacheSpec>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_async_get_and_refresh() {
    let cache = CacheBuilder::new()
        .with_spawner(tokio::runtime::Handle::current())
        .build_with_loader(VersionLoader {
            version: AtomicU64::new(7),
            reloads: AtomicU64::new(0),
        })
        .unwrap();
    let key = "async".to_string();

    assert_eq!(*cache.get_async(key.clone()).await.unwrap(), 7);
    assert!(cache.refresh(&key).completed().await);
    assert_eq!(*cache.get_if_present(&key).unwrap(), 7);
}
