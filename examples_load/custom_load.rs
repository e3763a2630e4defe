use std::time::{Duration, Instant};
use tracing::{error, Level};

use mongo_log_sink::config::{PipelineConfig, RetryPolicy};
use mongo_log_sink::init::{init_tracing_with_config, LayerConfig};
use mongo_log_sink::schema::{FieldType, Schema};
use mongo_log_sink::LogPipeline;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Schema::new([("message", FieldType::String), ("iteration", FieldType::Integer)])?;

    let config = PipelineConfig {
        high_water_mark: 50_000,
        retry: RetryPolicy {
            max_retries: 1,
            insert_timeout: Duration::from_millis(200),
            ..RetryPolicy::default()
        },
        ..PipelineConfig::default()
    };
    let mut pipeline = LogPipeline::with_config(schema, "noop://", config)?;

    let layer_config = LayerConfig {
        max_level: Level::ERROR,
        enable_stdout: false,
    };
    init_tracing_with_config(&pipeline, layer_config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s), buffer depth {}",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        pipeline.buffer_depth()
    );

    pipeline.stop()?;
    println!("drained in {:?}, stats: {:?}", start.elapsed(), pipeline.stats());
    Ok(())
}
