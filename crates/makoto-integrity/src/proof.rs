//! Merkle inclusion proofs and their verification.
//!
//! A proof is an owned list of sibling digests, leaf level first, each with
//! the side the sibling sits on. Proofs do not borrow the tree that produced
//! them and can be verified in another process from the leaf, its index and
//! the claimed root alone.
//!
//! Verification mirrors construction exactly: when a level has an odd node
//! count the last node is paired with itself, so its proof step carries the
//! node's own digest on the right.

use makoto_core::{attestation::MerkleProofDocument, Digest, HashAlgorithm};
use serde::{Deserialize, Serialize};

use crate::{
    error::{IntegrityError, Result},
    hasher,
};

/// Side of the path node on which a sibling sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling is the left input: `H(sibling || node)`.
    Left,
    /// Sibling is the right input: `H(node || sibling)`.
    Right,
}

impl Side {
    /// Returns the wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(IntegrityError::malformed_proof(format!("unknown orientation {other:?}"))),
        }
    }

    /// Side a sibling must be on at `level` for the leaf at `index`.
    fn expected(index: u64, level: usize) -> Self {
        if (index >> level) & 1 == 0 {
            Self::Right
        } else {
            Self::Left
        }
    }
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling digest at this level.
    pub sibling: Digest,
    /// Side the sibling sits on.
    pub side: Side,
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    algorithm: HashAlgorithm,
    leaf_index: u64,
    steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Creates a proof from its parts.
    pub fn new(algorithm: HashAlgorithm, leaf_index: u64, steps: Vec<ProofStep>) -> Self {
        Self { algorithm, leaf_index, steps }
    }

    /// Returns the algorithm the proof was built with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Returns the index of the proven leaf.
    pub fn leaf_index(&self) -> u64 {
        self.leaf_index
    }

    /// Returns the sibling path, leaf level first.
    pub fn steps(&self) -> &[ProofStep] {
        &self.steps
    }

    /// Converts to the hex wire form embedded in attestations.
    pub fn to_document(&self, leaf: &Digest) -> MerkleProofDocument {
        MerkleProofDocument {
            leaf_index: self.leaf_index,
            leaf_hash: leaf.to_hex(),
            siblings: self.steps.iter().map(|step| step.sibling.to_hex()).collect(),
            positions: self.steps.iter().map(|step| step.side.as_str().to_string()).collect(),
        }
    }

    /// Parses the hex wire form, returning the leaf digest and the proof.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::MalformedProof` for invalid hex, a missing
    /// or unknown orientation, or digests of the wrong length.
    pub fn from_document(
        document: &MerkleProofDocument,
        algorithm: HashAlgorithm,
    ) -> Result<(Digest, Self)> {
        if document.siblings.len() != document.positions.len() {
            return Err(IntegrityError::malformed_proof(format!(
                "{} siblings but {} orientations",
                document.siblings.len(),
                document.positions.len()
            )));
        }

        let leaf = parse_digest(&document.leaf_hash, algorithm, "leaf")?;
        let steps = document
            .siblings
            .iter()
            .zip(&document.positions)
            .map(|(sibling, position)| {
                Ok(ProofStep {
                    sibling: parse_digest(sibling, algorithm, "sibling")?,
                    side: Side::parse(position)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((leaf, Self::new(algorithm, document.leaf_index, steps)))
    }
}

fn parse_digest(hex_str: &str, algorithm: HashAlgorithm, what: &str) -> Result<Digest> {
    let digest = Digest::from_hex(hex_str)
        .map_err(|e| IntegrityError::malformed_proof(format!("{what} digest: {e}")))?;
    ensure_fits(&digest, algorithm, what)?;
    Ok(digest)
}

fn ensure_fits(digest: &Digest, algorithm: HashAlgorithm, what: &str) -> Result<()> {
    if digest.fits(algorithm) {
        Ok(())
    } else {
        Err(IntegrityError::malformed_proof(format!(
            "{what} digest is {} bytes, {algorithm} requires {}",
            digest.len(),
            algorithm.output_len()
        )))
    }
}

/// Verifies that `leaf` sits at `leaf_index` under `claimed_root`.
///
/// Returns `Ok(false)` when the recomputed root differs, when the proof was
/// issued for another index, or when an orientation contradicts the bits of
/// `leaf_index`.
///
/// # Errors
///
/// Returns `IntegrityError::MalformedProof` if a digest has the wrong length
/// for `algorithm`, the proof was built with another algorithm, or the path
/// is too short to address `leaf_index`.
pub fn verify_proof(
    leaf: &Digest,
    leaf_index: u64,
    proof: &MerkleProof,
    claimed_root: &Digest,
    algorithm: HashAlgorithm,
) -> Result<bool> {
    if proof.algorithm != algorithm {
        return Err(IntegrityError::malformed_proof(format!(
            "proof uses {}, verification requested {algorithm}",
            proof.algorithm
        )));
    }
    ensure_fits(leaf, algorithm, "leaf")?;
    ensure_fits(claimed_root, algorithm, "root")?;
    for step in &proof.steps {
        ensure_fits(&step.sibling, algorithm, "sibling")?;
    }

    let depth = proof.steps.len();
    if depth < 64 && leaf_index >> depth != 0 {
        return Err(IntegrityError::malformed_proof(format!(
            "path of {depth} steps cannot address leaf index {leaf_index}"
        )));
    }
    if proof.leaf_index != leaf_index {
        return Ok(false);
    }

    let mut node = *leaf;
    for (level, step) in proof.steps.iter().enumerate() {
        if step.side != Side::expected(leaf_index, level) {
            return Ok(false);
        }
        node = match step.side {
            Side::Right => hasher::node_hash(algorithm, &node, &step.sibling),
            Side::Left => hasher::node_hash(algorithm, &step.sibling, &node),
        };
    }

    Ok(node == *claimed_root)
}

/// Verifies a wire-form proof against `claimed_root`.
///
/// # Errors
///
/// Returns `IntegrityError::MalformedProof` if the document is structurally
/// invalid.
pub fn verify_document(
    document: &MerkleProofDocument,
    claimed_root: &Digest,
    algorithm: HashAlgorithm,
) -> Result<bool> {
    let (leaf, proof) = MerkleProof::from_document(document, algorithm)?;
    verify_proof(&leaf, document.leaf_index, &proof, claimed_root, algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALG: HashAlgorithm = HashAlgorithm::Sha256;

    fn h(data: &[u8]) -> Digest {
        hasher::digest(ALG, data)
    }

    fn two_leaf_proof() -> (Digest, Digest, MerkleProof) {
        let (a, b) = (h(b"a"), h(b"b"));
        let root = hasher::node_hash(ALG, &a, &b);
        let proof = MerkleProof::new(ALG, 0, vec![ProofStep { sibling: b, side: Side::Right }]);
        (a, root, proof)
    }

    #[test]
    fn accepts_valid_path() {
        let (leaf, root, proof) = two_leaf_proof();
        assert!(verify_proof(&leaf, 0, &proof, &root, ALG).unwrap());
    }

    #[test]
    fn wrong_root_is_false_not_error() {
        let (leaf, _, proof) = two_leaf_proof();
        assert!(!verify_proof(&leaf, 0, &proof, &h(b"other"), ALG).unwrap());
    }

    #[test]
    fn orientation_must_match_index() {
        let (leaf, root, proof) = two_leaf_proof();
        let mut flipped = proof.clone();
        flipped.steps[0].side = Side::Left;
        assert!(!verify_proof(&leaf, 0, &flipped, &root, ALG).unwrap());

        let reindexed = MerkleProof::new(ALG, 1, proof.steps.clone());
        assert!(!verify_proof(&leaf, 1, &reindexed, &root, ALG).unwrap());
    }

    #[test]
    fn structural_faults_are_errors() {
        let (leaf, root, proof) = two_leaf_proof();

        let short = Digest::from_slice(&[0u8; 16]).unwrap();
        let step = ProofStep { sibling: short, side: Side::Right };
        let bad_sibling = MerkleProof::new(ALG, 0, vec![step]);
        assert!(matches!(
            verify_proof(&leaf, 0, &bad_sibling, &root, ALG),
            Err(IntegrityError::MalformedProof { .. })
        ));

        assert!(matches!(
            verify_proof(&leaf, 0, &proof, &root, HashAlgorithm::Blake3),
            Err(IntegrityError::MalformedProof { .. })
        ));

        assert!(matches!(
            verify_proof(&leaf, 2, &proof, &root, ALG),
            Err(IntegrityError::MalformedProof { .. })
        ));
    }

    #[test]
    fn document_form_requires_orientation_per_sibling() {
        let (leaf, root, proof) = two_leaf_proof();
        let mut doc = proof.to_document(&leaf);
        assert!(verify_document(&doc, &root, ALG).unwrap());

        doc.positions.clear();
        assert!(matches!(
            verify_document(&doc, &root, ALG),
            Err(IntegrityError::MalformedProof { .. })
        ));

        doc.positions.push("up".into());
        assert!(verify_document(&doc, &root, ALG).unwrap_err().to_string().contains("orientation"));
    }

    #[test]
    fn document_rejects_bad_hex() {
        let (leaf, root, proof) = two_leaf_proof();
        let mut doc = proof.to_document(&leaf);
        doc.siblings[0] = "not-hex".into();
        assert!(verify_document(&doc, &root, ALG).is_err());
    }
}
