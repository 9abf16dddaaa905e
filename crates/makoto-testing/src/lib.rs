//! Test infrastructure for Makoto crates.
//!
//! Provides attestation fixtures wired by name, fake collaborators with
//! fixed verdicts and call counters, reproducible record generators and
//! shared proptest strategies.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod collaborators;
pub mod fixtures;
pub mod generators;
pub mod property;

pub use collaborators::{
    FailingResolver, RecordingResolver, SlowResolver, StaticSchemaValidator,
    StaticSignatureVerifier,
};
pub use fixtures::{digest_of, origin, reference, DbomBuilder, Lineage, TransformBuilder};
pub use generators::{payloads, shuffled_records, timed_records};
pub use makoto_core::TestClock;
pub use property::{arb_algorithm, arb_leaves, arb_level, arb_payloads, proptest_config};
