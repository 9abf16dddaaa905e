//! Benchmarks for Merkle tree construction and proof verification.
//!
//! Tracks the costs that bound sealing latency:
//! - Tree build per algorithm and leaf count
//! - Sequential versus parallel level hashing
//! - Inclusion proof generation and verification

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use makoto::{
    integrity::{hasher, verify_proof, MerkleTree},
    model::{Digest, HashAlgorithm},
};

fn leaves(algorithm: HashAlgorithm, count: usize) -> Vec<Digest> {
    (0..count).map(|i| hasher::leaf_hash(algorithm, format!("record-{i}").as_bytes())).collect()
}

/// Benchmarks tree construction across algorithms and window sizes.
fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_build");

    for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Blake3, HashAlgorithm::Sha512] {
        for count in [16, 1_024, 65_536] {
            let input = leaves(algorithm, count);
            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(
                BenchmarkId::new(algorithm.to_string(), count),
                &input,
                |b, input| {
                    b.iter_batched(
                        || input.clone(),
                        |leaves| black_box(MerkleTree::build(leaves, algorithm).unwrap().root()),
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

/// Compares sequential and parallel level hashing on a large window.
fn bench_parallel_threshold(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_parallel");
    let algorithm = HashAlgorithm::Sha256;
    let input = leaves(algorithm, 262_144);
    group.throughput(Throughput::Elements(input.len() as u64));
    group.sample_size(20);

    for (name, threshold) in [("sequential", usize::MAX), ("parallel", 4_096)] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || input.clone(),
                |leaves| {
                    let tree = MerkleTree::build_with_threshold(leaves, algorithm, threshold);
                    black_box(tree.unwrap())
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmarks proof generation and verification.
fn bench_proofs(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_proof");
    let algorithm = HashAlgorithm::Sha256;

    for count in [1_024u64, 65_536] {
        let tree = MerkleTree::build(leaves(algorithm, count as usize), algorithm).unwrap();
        let index = count / 3;
        let leaf = tree.leaves()[index as usize];
        let proof = tree.prove(index).unwrap();
        let root = tree.root();

        group.bench_with_input(BenchmarkId::new("prove", count), &tree, |b, tree| {
            b.iter(|| black_box(tree.prove(black_box(index)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("verify", count), &proof, |b, proof| {
            b.iter(|| {
                black_box(verify_proof(&leaf, index, proof, &root, algorithm).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tree_build, bench_parallel_threshold, bench_proofs);
criterion_main!(benches);
