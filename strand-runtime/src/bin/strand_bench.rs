//! Strand benchmark tool.
//!
//! Runs the controller against the in-memory simulated broker and reports
//! throughput and completion latency percentiles.
//!
//! # Usage
//!
//! ```bash
//! # Key ordering, 8 partitions of 10k records, 64 in flight
//! strand-bench --partitions 8 --records 10000 --concurrency 64 --ordering key
//!
//! # Simulated 200us of work per record, 1% failures
//! strand-bench --work-us 200 --fail-rate 0.01
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::cast_precision_loss)] // f64 precision loss acceptable in benchmark stats
#![allow(clippy::cast_possible_truncation)] // Safe casts in benchmark context
#![allow(clippy::uninlined_format_args)] // Format string style not critical

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use strand_core::{CommitMode, EngineConfig, ProcessingOrder, TopicPartition};
use strand_runtime::{Controller, DrainMode, SimulatedBroker};

/// Ordering mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    /// No ordering.
    Unordered,
    /// Per key.
    Key,
    /// Per partition.
    Partition,
}

impl From<OrderArg> for ProcessingOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Unordered => Self::Unordered,
            OrderArg::Key => Self::Key,
            OrderArg::Partition => Self::Partition,
        }
    }
}

/// Commit mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CommitArg {
    /// Synchronous consumer commits.
    Sync,
    /// Asynchronous consumer commits.
    Async,
    /// Transactional producer commits.
    Transactional,
}

impl From<CommitArg> for CommitMode {
    fn from(arg: CommitArg) -> Self {
        match arg {
            CommitArg::Sync => Self::PeriodicConsumerSync,
            CommitArg::Async => Self::PeriodicConsumerAsync,
            CommitArg::Transactional => Self::PeriodicTransactionalProducer,
        }
    }
}

/// Strand benchmark tool.
#[derive(Parser, Debug)]
#[command(name = "strand-bench")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of partitions.
    #[arg(long, default_value = "4")]
    partitions: u64,

    /// Records per partition.
    #[arg(long, default_value = "10000")]
    records: u64,

    /// Distinct keys per partition.
    #[arg(long, default_value = "100")]
    keys: u64,

    /// Target records in flight.
    #[arg(long, default_value = "32")]
    concurrency: u32,

    /// Ordering guarantee.
    #[arg(long, value_enum, default_value = "key")]
    ordering: OrderArg,

    /// Commit mode.
    #[arg(long, value_enum, default_value = "async")]
    commit_mode: CommitArg,

    /// Simulated work per record in microseconds.
    #[arg(long, default_value = "0")]
    work_us: u64,

    /// Probability that a record fails and is retried.
    #[arg(long, default_value = "0.0")]
    fail_rate: f64,

    /// RNG seed.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Log level.
    #[arg(long, default_value = "warn")]
    log_level: Level,
}

/// Prints a latency histogram.
fn print_latency(label: &str, hist: &Histogram<u64>) {
    println!("{label} latency (us):");
    println!("  p50:   {:>10}", hist.value_at_quantile(0.50));
    println!("  p90:   {:>10}", hist.value_at_quantile(0.90));
    println!("  p99:   {:>10}", hist.value_at_quantile(0.99));
    println!("  p99.9: {:>10}", hist.value_at_quantile(0.999));
    println!("  max:   {:>10}", hist.max());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let broker = SimulatedBroker::new(args.seed);
    let tps: Vec<TopicPartition> = (0..args.partitions)
        .map(|p| TopicPartition::new("bench", p))
        .collect();
    for tp in &tps {
        for n in 0..args.records {
            broker.append_keyed(tp, format!("key-{}", n % args.keys.max(1)), vec![0u8; 64]);
        }
    }
    broker.assign(tps.clone());

    let config = EngineConfig::default()
        .with_ordering(args.ordering.into())
        .with_max_concurrency(args.concurrency)
        .with_commit_mode(args.commit_mode.into())
        .with_retry_delay(Duration::from_millis(1));
    let mut controller = Controller::new(config, Arc::new(broker.clone()))?;
    if matches!(args.commit_mode, CommitArg::Transactional) {
        controller = controller.with_producer(Arc::new(broker.clone()));
    }
    let handle = controller.handle();

    let start = Instant::now();
    let completions = Arc::new(Mutex::new(Histogram::<u64>::new(3)?));
    let work = Arc::new(Mutex::new(Histogram::<u64>::new(3)?));
    let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(args.seed)));
    let (work_us, fail_rate) = (args.work_us, args.fail_rate.clamp(0.0, 1.0));

    let recorded = (Arc::clone(&completions), Arc::clone(&work));
    let run = tokio::spawn(controller.run(move |_record| {
        let (completions, work) = (Arc::clone(&recorded.0), Arc::clone(&recorded.1));
        let fail = fail_rate > 0.0 && rng.lock().gen_bool(fail_rate);
        async move {
            let began = Instant::now();
            if work_us > 0 {
                tokio::time::sleep(Duration::from_micros(work_us)).await;
            }
            let _ = work.lock().record(began.elapsed().as_micros() as u64);
            if fail {
                return Err("simulated failure");
            }
            let _ = completions.lock().record(start.elapsed().as_micros() as u64);
            Ok(())
        }
    }));

    info!(partitions = args.partitions, records = args.records, "Benchmark started");
    loop {
        let wm = handle.work_manager();
        let done = tps
            .iter()
            .all(|tp| wm.commit_point(tp).is_some_and(|o| o == broker.log_end(tp)));
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.close(DrainMode::Drain)?;
    let summary = run.await??;
    let elapsed = start.elapsed();

    let total = args.partitions * args.records;
    println!("=== strand-bench ===");
    println!("ordering:    {:?}", args.ordering);
    println!("commit mode: {:?}", args.commit_mode);
    println!("records:     {}", total);
    println!("succeeded:   {}", summary.succeeded);
    println!("retried:     {}", summary.failed);
    println!("commits:     {}", summary.commits);
    println!("elapsed:     {:.3}s", elapsed.as_secs_f64());
    println!("throughput:  {:.0} records/s", total as f64 / elapsed.as_secs_f64());
    print_latency("completion", &completions.lock());
    print_latency("user function", &work.lock());
    Ok(())
}
