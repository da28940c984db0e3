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

//! micro benchmark for pantry in-memory cache hit ratio

use std::sync::Arc;

use pantry_memory::{Cache, CacheBuilder, EvictionConfig, FifoConfig, LruConfig};
use rand::prelude::*;
use rand_distr::Zipf;

type CacheKey = u64;
type CacheValue = ();

const ITEMS: usize = 10_000;
const ITERATIONS: usize = 5_000_000;

/*
cargo bench --bench bench_hit_ratio

Compares the hit ratio of the eviction policies under a zipf workload, with moka as the baseline. The read-through
column drives the LRU cache through `get_or_load`, so it also exercises the single-flight path.
*/
fn cache_hit(cache: Cache<CacheKey, CacheValue>, keys: Arc<Vec<CacheKey>>) -> f64 {
    let mut hit = 0;
    for key in keys.iter() {
        if cache.get_if_present(key).is_some() {
            hit += 1;
        } else {
            cache.put(*key, ());
        }
    }
    hit as f64 / keys.len() as f64
}

fn read_through_hit(cache: Cache<CacheKey, CacheValue>, keys: Arc<Vec<CacheKey>>) -> f64 {
    let mut miss = 0;
    for key in keys.iter() {
        cache
            .get_or_load(key, |_| {
                miss += 1;
                Ok::<_, std::convert::Infallible>(())
            })
            .unwrap();
    }
    1.0 - miss as f64 / keys.len() as f64
}

fn moka_cache_hit(cache: &moka::sync::Cache<CacheKey, CacheValue>, keys: &[CacheKey]) -> f64 {
    let mut hit = 0;
    for key in keys.iter() {
        if cache.get(key).is_some() {
            hit += 1;
        } else {
            cache.insert(*key, ());
        }
    }
    hit as f64 / keys.len() as f64
}

fn new_cache(capacity: usize, eviction_config: impl Into<EvictionConfig>) -> Cache<CacheKey, CacheValue> {
    CacheBuilder::new()
        .with_maximum_size(capacity)
        .with_concurrency_level(1)
        .with_eviction_config(eviction_config)
        .build()
        .unwrap()
}

fn bench_workload(keys: Vec<CacheKey>, cache_size: usize) {
    let fifo_cache = new_cache(cache_size, FifoConfig {});
    let lru_cache = new_cache(cache_size, LruConfig {});
    let read_through_cache = new_cache(cache_size, LruConfig {});
    let moka_cache = moka::sync::Cache::new(cache_size as u64);

    let keys = Arc::new(keys);

    let fifo_handle = std::thread::spawn({
        let keys = keys.clone();
        move || cache_hit(fifo_cache, keys)
    });
    let lru_handle = std::thread::spawn({
        let keys = keys.clone();
        move || cache_hit(lru_cache, keys)
    });
    let read_through_handle = std::thread::spawn({
        let keys = keys.clone();
        move || read_through_hit(read_through_cache, keys)
    });
    let moka_handle = std::thread::spawn({
        let keys = keys.clone();
        move || moka_cache_hit(&moka_cache, &keys)
    });

    print!("{:15.2}%", fifo_handle.join().unwrap() * 100.0);
    print!("{:15.2}%", lru_handle.join().unwrap() * 100.0);
    print!("{:15.2}%", read_through_handle.join().unwrap() * 100.0);
    print!("{:15.2}%", moka_handle.join().unwrap() * 100.0);
    println!();
}

fn bench_one(zif_exp: f64, cache_size_percent: f64) {
    print!("{zif_exp:6.2}, {cache_size_percent:6}{:6}", "");
    let mut rng = rand::rng();
    let zipf = Zipf::new(ITEMS as f64, zif_exp).unwrap();

    let cache_size = (ITEMS as f64 * cache_size_percent) as usize;
    let keys = (0..ITERATIONS).map(|_| zipf.sample(&mut rng) as CacheKey).collect();
    bench_workload(keys, cache_size);
}

fn main() {
    println!(
        "{:30}{:16}{:16}{:16}{:16}",
        "zif_exp, cache_size", "fifo", "lru", "lru (load)", "moka"
    );
    for zif_exp in [0.9, 1.0, 1.05, 1.1, 1.5] {
        for cache_capacity in [0.005, 0.01, 0.05, 0.1, 0.25] {
            bench_one(zif_exp, cache_capacity);
        }
    }
}
