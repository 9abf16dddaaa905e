//! Makoto stream integrity engine.
//!
//! Commits bounded windows of a record stream to Merkle roots, links every
//! sealed window to its predecessor in a hash chain, attests each window as
//! an in-toto statement and verifies attestation lineage with a
//! weakest-link trust level.
//!
//! The building blocks live in the member crates, re-exported here:
//!
//! - [`model`]: ids, levels, digests, attestation documents and the
//!   collaborator traits.
//! - [`integrity`]: Merkle trees, inclusion proofs, chain linking, signing.
//! - [`stream`]: window assignment, accumulation and the sealing engine.
//! - [`verify`]: attestation chain verification.
//!
//! This crate adds layered [`Config`], tracing setup and a [`Pipeline`]
//! wiring ingestion, attestation and verification together.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod pipeline;
pub mod telemetry;

pub use config::Config;
pub use makoto_core as model;
pub use makoto_integrity as integrity;
pub use makoto_stream as stream;
pub use makoto_verify as verify;
pub use pipeline::{Attested, Pipeline};
