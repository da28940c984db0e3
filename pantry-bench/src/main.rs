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

//! Load generator for pantry.
//!
//! Runs reader and writer threads against a [`LoadingCache`] over a zipf key distribution and reports throughput,
//! hit ratio and latency percentiles.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use itertools::Itertools;
use pantry::{CacheBuilder, CacheStats, FifoConfig, LoadingCache, LruConfig};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::{Distribution, Zipf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Eviction {
    Lru,
    Fifo,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Cache descriptor, e.g. `maximumSize=10000,expireAfterWrite=2m`.
    #[arg(long, default_value = "maximumSize=10000")]
    spec: String,

    /// Eviction algorithm.
    #[arg(long, value_enum, default_value_t = Eviction::Lru)]
    eviction: Eviction,

    /// Worker threads.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Bench duration.
    #[arg(long, default_value = "10s")]
    time: humantime::Duration,

    /// Key space of the zipf distribution.
    #[arg(long, default_value_t = 100_000)]
    key_range: u64,

    /// Zipf exponent.
    #[arg(long, default_value_t = 1.0)]
    zipf_s: f64,

    /// Simulated latency of each load.
    #[arg(long, default_value = "100us")]
    load_latency: humantime::Duration,

    /// Fraction of operations that are explicit writes.
    #[arg(long, default_value_t = 0.0)]
    write_ratio: f64,

    /// Seed of the first thread, the others use consecutive seeds.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

fn histogram() -> anyhow::Result<Histogram<u64>> {
    // 1ns to 1min with 3 significant digits.
    Ok(Histogram::new_with_bounds(1, 60_000_000_000, 3)?)
}

struct Worker {
    id: usize,
    cache: LoadingCache<u64, Vec<u8>>,
    zipf: Zipf<f64>,
    args: Args,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) -> anyhow::Result<Histogram<u64>> {
        let mut rng = SmallRng::seed_from_u64(self.args.seed + self.id as u64);
        let mut hist = histogram()?;
        while !self.stop.load(Ordering::Relaxed) {
            let key = self.zipf.sample(&mut rng) as u64;
            let start = Instant::now();
            if rng.random_bool(self.args.write_ratio) {
                self.cache.put(key, key.to_le_bytes().to_vec());
            } else if let Err(e) = self.cache.get(&key) {
                tracing::warn!("[bench]: get {key} failed: {e}");
            }
            hist.saturating_record(start.elapsed().as_nanos() as u64);
        }
        Ok(hist)
    }
}

fn report(elapsed: Duration, hist: &Histogram<u64>, stats: &CacheStats, size: usize) {
    let ops = hist.len();
    println!("elapsed:       {}", humantime::format_duration(elapsed));
    println!("ops:           {ops}");
    println!("throughput:    {:.2} ops/s", ops as f64 / elapsed.as_secs_f64());
    println!("entries:       {size}");
    println!("hit ratio:     {:.2}%", stats.hit_rate() * 100.0);
    println!("loads:         {} ({} failed)", stats.load_count(), stats.load_exception_count);
    println!("load penalty:  {:?}", stats.average_load_penalty());
    println!("evictions:     {}", stats.eviction_count);
    for (name, quantile) in [("p50", 0.5), ("p90", 0.9), ("p99", 0.99), ("p999", 0.999)] {
        println!(
            "latency {name:5} {:?}",
            Duration::from_nanos(hist.value_at_quantile(quantile))
        );
    }
    println!("latency max   {:?}", Duration::from_nanos(hist.max()));
}

fn main() -> anyhow::Result<()> {
    init_logger();

    #[cfg(feature = "deadlock")]
    {
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            println!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                println!("Deadlock #{}", i);
                for t in threads {
                    println!("Thread Id {:#?}", t.thread_id());
                    println!("{:#?}", t.backtrace());
                }
            }
        });
    }

    let args = Args::parse();
    tracing::info!("[bench]: args: {args:?}");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.write_ratio),
        "write ratio must be within [0, 1], given: {}",
        args.write_ratio
    );

    let latency: Duration = args.load_latency.into();
    let builder = CacheBuilder::<u64, Vec<u8>>::from_spec_str(&args.spec)?.with_name("bench").with_record_stats(true);
    let builder = match args.eviction {
        Eviction::Lru => builder.with_eviction_config(LruConfig {}),
        Eviction::Fifo => builder.with_eviction_config(FifoConfig {}),
    };
    let cache = builder.build_with_loader(move |key: &u64| {
        thread::sleep(latency);
        Ok::<_, std::convert::Infallible>(key.to_le_bytes().to_vec())
    })?;

    let zipf = Zipf::new(args.key_range as f64, args.zipf_s).context("invalid zipf parameters")?;
    let stop = Arc::new(AtomicBool::new(false));
    let start = Instant::now();

    let handles = (0..args.threads)
        .map(|id| {
            let worker = Worker {
                id,
                cache: cache.clone(),
                zipf,
                args: args.clone(),
                stop: stop.clone(),
            };
            thread::Builder::new()
                .name(format!("pantry-bench-{id}"))
                .spawn(move || worker.run())
        })
        .try_collect::<_, Vec<_>, _>()?;

    thread::sleep(args.time.into());
    stop.store(true, Ordering::Relaxed);

    let mut hist = histogram()?;
    for handle in handles {
        let h = handle.join().map_err(|_| anyhow::anyhow!("bench worker panicked"))??;
        hist.add(h)?;
    }
    report(start.elapsed(), &hist, &cache.stats(), cache.size());
    Ok(())
}
