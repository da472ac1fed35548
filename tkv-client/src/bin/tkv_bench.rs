//! # Client Benchmark Harness
//!
//! Purpose: Drive a running server through the pooled client so throughput
//! and tail latency can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: A fixed PRNG seed picks the keys.
//! 2. **Allocation Control**: Keys are built before the timed section.
//! 3. **Pipelining**: Queries are sent in batches to keep every link busy.
//!
//! Usage: `tkv_bench [keys] [ops] [batch]`, endpoint from `TKV_*` variables.

use std::env;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use tkv_client::protocol::{Request, Response, TtlType};
use tkv_client::{Client, ClientConfig, MetricsSnapshot};

const DEFAULT_KEY_COUNT: usize = 1 << 10;
const DEFAULT_OP_COUNT: usize = 100_000;
const DEFAULT_BATCH: usize = 32;

struct BenchConfig {
    key_count: usize,
    key_mask: usize,
    op_count: usize,
    batch: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let key_count = parse_usize(args.next(), DEFAULT_KEY_COUNT)
            .max(1)
            .next_power_of_two();
        let op_count = parse_usize(args.next(), DEFAULT_OP_COUNT);
        let batch = parse_usize(args.next(), DEFAULT_BATCH).max(1);
        BenchConfig {
            key_count,
            key_mask: key_count - 1,
            op_count,
            batch,
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// XorShift keeps the key sequence reproducible between runs.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let ops_per_sec = (ops as f64) / secs;
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s)");
}

fn report_latency(snapshot: &MetricsSnapshot) {
    let fmt = |q: f64| match snapshot.latency.percentile(q) {
        Some(bound) => format!("<={}us", bound.as_micros()),
        None => "overflow".to_string(),
    };
    println!(
        "calls={} errors={} reconnects={} mean={}us p50={} p99={} p999={}",
        snapshot.requests_total,
        snapshot.errors_total,
        snapshot.reconnects_total,
        snapshot.latency.mean().as_micros(),
        fmt(0.5),
        fmt(0.99),
        fmt(0.999),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bench = BenchConfig::from_args();
    let config = ClientConfig::from_env().context("reading TKV_* configuration")?;
    println!(
        "endpoint={} width={} links={} keys={} ops={} batch={}",
        config.endpoint(),
        config.width,
        config.max_connections,
        bench.key_count,
        bench.op_count,
        bench.batch
    );

    let client = Client::with_config(config)
        .await
        .context("connecting to server")?;

    let keys: Vec<String> = (0..bench.key_count).map(|idx| format!("bench:{idx:08x}")).collect();

    let start = Instant::now();
    for chunk in keys.chunks(bench.batch) {
        let batch: Vec<Request> = chunk
            .iter()
            .map(|key| Request::Insert {
                key: key.clone(),
                quota: 1_000,
                ttl_type: TtlType::Seconds,
                ttl: 600,
            })
            .collect();
        client.send_batch(&batch).await?;
    }
    report("INSERT", keys.len(), start.elapsed());

    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0);
    let mut misses = 0usize;
    let mut remaining = bench.op_count;
    let start = Instant::now();
    while remaining > 0 {
        let size = remaining.min(bench.batch);
        let batch: Vec<Request> = (0..size)
            .map(|_| Request::Query {
                key: keys[rng.next_index(bench.key_mask)].clone(),
            })
            .collect();
        for response in client.send_batch(&batch).await? {
            match response {
                Response::Query(query) if query.success => {}
                Response::Query(_) => misses += 1,
                other => bail!("unexpected {} response to QUERY", other.kind()),
            }
        }
        remaining -= size;
    }
    report("QUERY", bench.op_count, start.elapsed());
    if misses > 0 {
        println!("QUERY misses: {misses}");
    }

    report_latency(&client.metrics());
    client.disconnect().await;
    Ok(())
}
