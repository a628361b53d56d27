//! Replays a tracefile against [`BlockMalloc`] and prints its utilization and throughput.
//!
//! ```text
//! malloc-bench <tracefile> [dump]
//! ```
//!
//! With `dump` the decoded trace is printed instead. Settings come from the environment:
//! - `ALMALLOC_MIN_OPS`: minimum number of operations to time (default 1000000),
//! - `ALMALLOC_EFFECTIVE_UTIL`: set to `1` to round requests up to their alignment when
//!   measuring utilization,
//! - `ALMALLOC_HEAP_SIZE`: size of each heap instance in bytes (default 64 MiB),
//! - `RUST_LOG`: log filter (default `info`).

use std::env;
use std::process::ExitCode;
use std::str::FromStr;

use almalloc::bench::{measure_utilization, time_trace, TracefileReader, UtilizationConfig};
use almalloc::heaps::MmapHeapFactory;
use almalloc::BlockMalloc;

use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use self::format::SimpleFormatter;

mod format;

const DEFAULT_MIN_OPS: usize = 1_000_000;
const DEFAULT_HEAP_SIZE: usize = 64 << 20;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .event_format(SimpleFormatter)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run(path: &str, dump: bool) -> almalloc::Result<()> {
    let reader = TracefileReader::open(path)?;

    if dump {
        for line in &reader {
            println!("{line}");
        }
        return Ok(());
    }

    let config = UtilizationConfig {
        effective: env_or("ALMALLOC_EFFECTIVE_UTIL", 0u8) != 0,
    };
    let min_ops = env_or("ALMALLOC_MIN_OPS", DEFAULT_MIN_OPS);
    let heap_size = env_or("ALMALLOC_HEAP_SIZE", DEFAULT_HEAP_SIZE);

    let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), heap_size);

    let utilization = measure_utilization(&reader, &mut allocator, config)?;
    println!(
        "{path}: utilization {:.2}% ({} / {} bytes)",
        utilization.ratio() * 100.0,
        utilization.peak_live_bytes,
        utilization.heap_bytes
    );

    let throughput = time_trace(&reader, &mut allocator, min_ops)?;
    println!(
        "{path}: {:.3} Mops/s ({} ops in {:?})",
        throughput.ops_per_microsecond(),
        throughput.total_ops,
        throughput.elapsed
    );
    Ok(())
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let (path, dump) = match args.as_slice() {
        [_, path] => (path.as_str(), false),
        [_, path, mode] if mode == "dump" => (path.as_str(), true),
        _ => {
            eprintln!("usage: malloc-bench <tracefile> [dump]");
            return ExitCode::from(2);
        }
    };

    match run(path, dump) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "Benchmark failed.");
            ExitCode::FAILURE
        }
    }
}
