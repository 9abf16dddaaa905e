//! Property-based tests for pipeline-wide integrity invariants.
//!
//! Random arrival orders are pushed through complete pipelines to check
//! that sealing is deterministic regardless of worker count, that every
//! accepted record lands in exactly one tumbling window and that every
//! sealed window verifies.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use makoto::{
    integrity::EnvelopeSigner,
    model::{Level, SealedWindow, TestClock},
    stream::Record,
    Attested, Config, Pipeline,
};
use makoto_testing::{fixtures::fixture_time, proptest_config, shuffled_records};
use proptest::{prelude::*, test_runner::TestRunner};

async fn seal(records: &[Record], workers: usize, signed: bool) -> Attested {
    let config = Config {
        stream_id: "prop".to_string(),
        window_duration: Some("PT10S".to_string()),
        seal_workers: workers,
        ..Config::default()
    };
    let signer = signed.then(|| Arc::new(EnvelopeSigner::ephemeral()));
    let clock = Arc::new(TestClock::starting_at(fixture_time()));
    let pipeline = Pipeline::start(&config, signer, clock).await.unwrap();
    for record in records {
        pipeline.ingest(record).unwrap();
    }
    pipeline.finish().await.unwrap()
}

fn roots(chain: &[SealedWindow]) -> Vec<String> {
    chain.iter().map(|w| format!("{}={}", w.window_id, w.tree.root)).collect()
}

fn start() -> DateTime<Utc> {
    fixture_time()
}

#[test]
fn sealing_is_independent_of_worker_count() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut runner = TestRunner::new(proptest_config());

    runner
        .run(&(1usize..60, any::<u64>(), 1usize..6), |(count, seed, workers)| {
            rt.block_on(async {
                let records = shuffled_records(start(), Duration::milliseconds(700), count, seed);

                let single = seal(&records, 1, false).await;
                let pooled = seal(&records, workers, false).await;

                prop_assert_eq!(roots(single.chain()), roots(pooled.chain()));
                Ok(())
            })
        })
        .unwrap();
}

#[test]
fn every_record_lands_in_one_tumbling_window() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut runner = TestRunner::new(proptest_config());

    runner
        .run(&(1usize..80, any::<u64>()), |(count, seed)| {
            rt.block_on(async {
                let records = shuffled_records(start(), Duration::milliseconds(450), count, seed);
                let attested = seal(&records, 2, false).await;

                let leaves: u64 = attested.chain().iter().map(|w| w.tree.leaf_count).sum();
                prop_assert_eq!(leaves, count as u64);
                for (k, window) in attested.chain().iter().enumerate() {
                    prop_assert_eq!(window.chain.chain_length, k as u64 + 1);
                }
                Ok(())
            })
        })
        .unwrap();
}

#[test]
fn sealed_windows_always_verify() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut runner = TestRunner::new(proptest_config());

    runner
        .run(&(1usize..40, any::<u64>()), |(count, seed)| {
            rt.block_on(async {
                let records = shuffled_records(start(), Duration::seconds(3), count, seed);
                let attested = seal(&records, 3, true).await;

                for (window_id, result) in attested.verify_all().await.unwrap() {
                    prop_assert!(result.valid, "{}: {:?}", window_id, result.errors);
                    prop_assert_eq!(result.level, Some(Level::L2));
                }
                Ok(())
            })
        })
        .unwrap();
}
