use std::time::Instant;
use tracing::error;

use mongo_log_sink::init::init_tracing;
use mongo_log_sink::schema::{FieldType, Schema};
use mongo_log_sink::LogPipeline;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Schema::new([
        ("message", FieldType::String),
        ("levelname", FieldType::String),
        ("iteration", FieldType::Integer),
    ])?;
    let mut pipeline = LogPipeline::new(schema, "noop://")?;
    init_tracing(&pipeline)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Wait for the worker to drain what was emitted.
    pipeline.stop()?;
    println!("drained in {:?}, stats: {:?}", start.elapsed(), pipeline.stats());
    Ok(())
}
