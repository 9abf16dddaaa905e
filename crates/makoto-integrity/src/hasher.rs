//! Algorithm-agile digest functions.
//!
//! Leaves are `H(record_bytes)` and internal nodes are `H(left || right)`
//! with no domain-separation prefix. Hashing is pure and allocation-free.

use makoto_core::{Digest, HashAlgorithm};
use sha2::{Digest as _, Sha256, Sha384, Sha512};

/// Hashes `data` with `algorithm`.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Digest {
    match algorithm {
        HashAlgorithm::Sha256 => Digest::from_output(&Sha256::digest(data)),
        HashAlgorithm::Sha384 => Digest::from_output(&Sha384::digest(data)),
        HashAlgorithm::Sha512 => Digest::from_output(&Sha512::digest(data)),
        HashAlgorithm::Blake3 => Digest::from_output(blake3::hash(data).as_bytes()),
    }
}

/// Computes the leaf digest of one record.
pub fn leaf_hash(algorithm: HashAlgorithm, record: &[u8]) -> Digest {
    digest(algorithm, record)
}

/// Computes the parent of two nodes: `H(left || right)`.
pub fn node_hash(algorithm: HashAlgorithm, left: &Digest, right: &Digest) -> Digest {
    let (left, right) = (left.as_bytes(), right.as_bytes());
    match algorithm {
        HashAlgorithm::Sha256 => {
            Digest::from_output(&Sha256::new().chain_update(left).chain_update(right).finalize())
        },
        HashAlgorithm::Sha384 => {
            Digest::from_output(&Sha384::new().chain_update(left).chain_update(right).finalize())
        },
        HashAlgorithm::Sha512 => {
            Digest::from_output(&Sha512::new().chain_update(left).chain_update(right).finalize())
        },
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(left);
            hasher.update(right);
            Digest::from_output(hasher.finalize().as_bytes())
        },
    }
}
