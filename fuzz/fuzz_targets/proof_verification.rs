#![no_main]

//! Fuzz target for Merkle inclusion proof verification.
//!
//! Builds a tree from fuzzer-chosen records, then checks that honest proofs
//! verify and that proofs mutated by fuzzer bytes are rejected or reported
//! as malformed, never accepted for another leaf and never panicking.

use libfuzzer_sys::fuzz_target;
use makoto_core::{HashAlgorithm, MerkleProofDocument};
use makoto_integrity::{hasher, verify_document, MerkleTree};

fuzz_target!(|data: &[u8]| {
    fuzz_proof_verification(data);
});

fn fuzz_proof_verification(data: &[u8]) {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let algorithm = match selector % 4 {
        0 => HashAlgorithm::Sha256,
        1 => HashAlgorithm::Sha384,
        2 => HashAlgorithm::Sha512,
        _ => HashAlgorithm::Blake3,
    };

    let records: Vec<&[u8]> = rest.chunks(7).collect();
    let Ok(tree) = MerkleTree::from_records(&records, algorithm) else {
        return;
    };
    let root = tree.root();
    let index = u64::from(selector) % tree.leaf_count();

    let proof = tree.prove(index).expect("index is within the tree");
    let leaf = tree.leaves()[index as usize];
    let document = proof.to_document(&leaf);
    assert_eq!(verify_document(&document, &root, algorithm).ok(), Some(true));

    // A different leaf must never verify under the honest path.
    let forged_leaf = hasher::leaf_hash(algorithm, data);
    if forged_leaf != leaf {
        let forged = MerkleProofDocument { leaf_hash: forged_leaf.to_hex(), ..document.clone() };
        assert_ne!(verify_document(&forged, &root, algorithm).ok(), Some(true));
    }

    // Raw fuzzer bytes as a proof document must not panic.
    if let Ok(raw) = serde_json::from_slice::<MerkleProofDocument>(rest) {
        let _ = verify_document(&raw, &root, algorithm);
    }
}
