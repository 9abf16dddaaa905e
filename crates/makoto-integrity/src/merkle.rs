//! Binary Merkle trees over window leaves.
//!
//! Trees are built bottom-up from an ordered sequence of leaf digests. When
//! a level has an odd number of nodes, the last node is paired with itself
//! to form its parent; [`crate::proof::verify_proof`] applies the same rule.
//! A single-leaf tree's root is the leaf itself.
//!
//! Height counts levels, including the leaf level and the root, so one leaf
//! has height 1 and four leaves have height 3.
//!
//! Large levels are hashed in parallel with rayon. Parents are collected in
//! index order, so the parallel build is byte-identical to the sequential
//! one.

use makoto_core::{Digest, HashAlgorithm, TreeHead};
use rayon::prelude::*;

use crate::{
    error::{IntegrityError, Result},
    hasher,
    proof::{MerkleProof, ProofStep, Side},
};

/// Level size at which parent hashing switches to the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Built Merkle tree: every level from leaves to root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    algorithm: HashAlgorithm,
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Builds a tree over `leaves`.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::EmptyInput` if `leaves` is empty and
    /// `IntegrityError::InvalidLeaf` if a digest does not fit `algorithm`.
    pub fn build(leaves: Vec<Digest>, algorithm: HashAlgorithm) -> Result<Self> {
        Self::build_with_threshold(leaves, algorithm, DEFAULT_PARALLEL_THRESHOLD)
    }

    /// Builds a tree, hashing levels of at least `parallel_threshold` nodes
    /// in parallel.
    ///
    /// # Errors
    ///
    /// Same as [`MerkleTree::build`].
    pub fn build_with_threshold(
        leaves: Vec<Digest>,
        algorithm: HashAlgorithm,
        parallel_threshold: usize,
    ) -> Result<Self> {
        if leaves.is_empty() {
            return Err(IntegrityError::EmptyInput);
        }
        if let Some((index, leaf)) = leaves.iter().enumerate().find(|(_, l)| !l.fits(algorithm)) {
            return Err(IntegrityError::InvalidLeaf {
                index,
                len: leaf.len(),
                expected: algorithm.output_len(),
            });
        }

        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let parents = parent_level(level, algorithm, parallel_threshold);
            levels.push(parents);
        }

        Ok(Self { algorithm, levels })
    }

    /// Hashes each record and builds a tree over the resulting leaves.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::EmptyInput` if there are no records.
    pub fn from_records<I, R>(records: I, algorithm: HashAlgorithm) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let leaves =
            records.into_iter().map(|r| hasher::leaf_hash(algorithm, r.as_ref())).collect();
        Self::build(leaves, algorithm)
    }

    /// Returns the hash algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Returns the root digest.
    pub fn root(&self) -> Digest {
        // Construction guarantees a final level with exactly one node.
        self.levels[self.levels.len() - 1][0]
    }

    /// Returns the number of levels, counting leaves and root.
    pub fn height(&self) -> u32 {
        u32::try_from(self.levels.len()).unwrap_or(u32::MAX)
    }

    /// Returns the number of leaves.
    pub fn leaf_count(&self) -> u64 {
        self.levels[0].len() as u64
    }

    /// Returns the leaf digests in tree order.
    pub fn leaves(&self) -> &[Digest] {
        &self.levels[0]
    }

    /// Returns the tree head summary.
    pub fn head(&self) -> TreeHead {
        TreeHead {
            algorithm: self.algorithm,
            root: self.root(),
            height: self.height(),
            leaf_count: self.leaf_count(),
        }
    }

    /// Produces the inclusion proof for the leaf at `leaf_index`.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::IndexOutOfRange` if `leaf_index` is not less
    /// than the leaf count.
    pub fn prove(&self, leaf_index: u64) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        let mut index = usize::try_from(leaf_index)
            .ok()
            .filter(|_| leaf_index < leaf_count)
            .ok_or(IntegrityError::IndexOutOfRange { index: leaf_index, leaf_count })?;

        let mut steps = Vec::with_capacity(self.levels.len() - 1);
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if index % 2 == 0 {
                // An unpaired last node is its own right sibling.
                let sibling = level.get(index + 1).unwrap_or(&level[index]);
                ProofStep { sibling: *sibling, side: Side::Right }
            } else {
                ProofStep { sibling: level[index - 1], side: Side::Left }
            };
            steps.push(step);
            index /= 2;
        }

        Ok(MerkleProof::new(self.algorithm, leaf_index, steps))
    }
}

fn parent_level(
    level: &[Digest],
    algorithm: HashAlgorithm,
    parallel_threshold: usize,
) -> Vec<Digest> {
    let combine = |pair: &[Digest]| hasher::node_hash(algorithm, &pair[0], &pair[pair.len() - 1]);
    if level.len() >= parallel_threshold {
        level.par_chunks(2).map(combine).collect()
    } else {
        level.chunks(2).map(combine).collect()
    }
}

/// Number of levels in a tree of `leaf_count` leaves.
pub fn expected_height(leaf_count: u64) -> u32 {
    match leaf_count {
        0 => 0,
        n => 1 + (64 - (n - 1).leading_zeros()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::verify_proof;

    const ALG: HashAlgorithm = HashAlgorithm::Sha256;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n).map(|i| hasher::leaf_hash(ALG, format!("record-{i}").as_bytes())).collect()
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(MerkleTree::build(Vec::new(), ALG), Err(IntegrityError::EmptyInput)));
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let tree = MerkleTree::build(leaves(1), ALG).unwrap();
        assert_eq!(tree.root(), tree.leaves()[0]);
        assert_eq!(tree.height(), 1);
        assert!(tree.prove(0).unwrap().steps().is_empty());
    }

    #[test]
    fn heights_count_every_level() {
        for (n, height) in [(1, 1), (2, 2), (3, 3), (4, 3), (5, 4), (8, 4), (9, 5)] {
            let tree = MerkleTree::build(leaves(n), ALG).unwrap();
            assert_eq!(tree.height(), height, "{n} leaves");
            assert_eq!(expected_height(n as u64), height);
        }
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let l = leaves(3);
        let tree = MerkleTree::build(l.clone(), ALG).unwrap();

        let ab = hasher::node_hash(ALG, &l[0], &l[1]);
        let cc = hasher::node_hash(ALG, &l[2], &l[2]);
        assert_eq!(tree.root(), hasher::node_hash(ALG, &ab, &cc));

        let proof = tree.prove(2).unwrap();
        assert_eq!(proof.steps()[0], ProofStep { sibling: l[2], side: Side::Right });
        assert!(verify_proof(&l[2], 2, &proof, &tree.root(), ALG).unwrap());
    }

    #[test]
    fn parallel_build_matches_sequential() {
        let l = leaves(1_000);
        let sequential = MerkleTree::build_with_threshold(l.clone(), ALG, usize::MAX).unwrap();
        let parallel = MerkleTree::build_with_threshold(l, ALG, 2).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn prove_rejects_out_of_range_index() {
        let tree = MerkleTree::build(leaves(4), ALG).unwrap();
        assert!(matches!(
            tree.prove(4),
            Err(IntegrityError::IndexOutOfRange { index: 4, leaf_count: 4 })
        ));
    }

    #[test]
    fn leaves_must_fit_algorithm() {
        let err = MerkleTree::build(leaves(2), HashAlgorithm::Sha512).unwrap_err();
        assert!(matches!(err, IntegrityError::InvalidLeaf { index: 0, len: 32, expected: 64 }));
    }
}
