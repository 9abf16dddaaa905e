//! Makoto stream integrity engine.
//!
//! Reads one record per line from stdin, seals the configured windows and
//! attests them with an ephemeral signing key. At end of input (or on
//! CTRL+C) every open window is sealed and each window attestation is
//! verified; results are written to stdout as JSON lines.

use std::sync::Arc;

use anyhow::{Context, Result};
use makoto::{
    integrity::EnvelopeSigner,
    model::{Clock, RealClock},
    stream::Record,
    Config, Pipeline,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    makoto::telemetry::init_tracing_with(&config.log_filter)?;

    info!(
        stream_id = %config.stream_id,
        window_type = %config.window_type,
        algorithm = %config.hash_algorithm,
        seal_workers = config.seal_workers,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let signer = Arc::new(EnvelopeSigner::ephemeral());
    info!(key_id = %signer.key_id(), "Signing with ephemeral key");

    let pipeline = Pipeline::start(&config, Some(signer), clock.clone()).await?;
    let ingested = ingest_stdin(&pipeline, clock.as_ref()).await?;

    let metrics = pipeline.metrics()?;
    info!(
        records = ingested,
        late = metrics.late_records,
        dropped = metrics.dropped_records,
        "Input finished, sealing open windows"
    );

    let attested = pipeline.finish().await?;
    let mut invalid = 0usize;
    for (window_id, result) in attested.verify_all().await? {
        if !result.valid {
            invalid += 1;
            warn!(
                window_id = %window_id,
                errors = result.errors.len(),
                "Window failed verification"
            );
        }
        let line = serde_json::json!({ "windowId": window_id, "verification": result });
        println!("{}", serde_json::to_string(&line).context("Failed to encode result")?);
    }

    info!(windows = attested.chain().len(), invalid, "Makoto shutdown complete");
    if invalid > 0 {
        anyhow::bail!("{invalid} window(s) failed verification");
    }
    Ok(())
}

/// Ingests stdin lines until end of input or CTRL+C. Returns the number of
/// records read.
async fn ingest_stdin(pipeline: &Pipeline, clock: &dyn Clock) -> Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                None
            }
        };
        let Some(line) = line else {
            return Ok(count);
        };
        if line.is_empty() {
            continue;
        }
        pipeline.ingest(&Record::new(line.into_bytes(), clock.now_utc()))?;
        count += 1;
    }
}
