//! Ed25519 DSSE signing and signature verification.
//!
//! Signatures cover the DSSE pre-authentication encoding of the canonical
//! JSON body:
//!
//! ```text
//! "DSSEv1" SP len(type) SP type SP len(body) SP body
//! ```
//!
//! with type `application/vnd.in-toto+json`. Key ids are derived from the
//! public key, so the same key always has the same id.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use makoto_core::{
    attestation::EnvelopeSignature, Attestation, CollaboratorError, CollaboratorResult,
    SignatureVerifier,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{IntegrityError, Result};

/// DSSE payload type for in-toto statements.
pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// Builds the DSSE pre-authentication encoding of `payload`.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!("DSSEv1 {} {payload_type} {} ", payload_type.len(), payload.len());
    let mut message = Vec::with_capacity(header.len() + payload.len());
    message.extend_from_slice(header.as_bytes());
    message.extend_from_slice(payload);
    message
}

/// Derives the key id of a public key.
///
/// The first 16 bytes of SHA-256 over the key, formatted as a UUID.
pub fn key_id(verifying_key: &VerifyingKey) -> String {
    let hash = Sha256::digest(verifying_key.to_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

/// Signs attestations with one Ed25519 key.
#[derive(Debug)]
pub struct EnvelopeSigner {
    signing_key: SigningKey,
    key_id: String,
}

impl EnvelopeSigner {
    /// Creates a signer with a fresh random key.
    pub fn ephemeral() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Creates a signer from a 32-byte secret key.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    /// Creates a signer from a hex-encoded 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::InvalidKeyFormat` for bad hex or length.
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| IntegrityError::InvalidKeyFormat { message: e.to_string() })?;
        let secret: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            IntegrityError::InvalidKeyFormat {
                message: format!("expected 32 bytes, got {}", b.len()),
            }
        })?;
        Ok(Self::from_bytes(&secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let key_id = key_id(&signing_key.verifying_key());
        Self { signing_key, key_id }
    }

    /// Returns the key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs the attestation's canonical body.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::Core` if the body cannot be serialized.
    pub fn sign(&self, attestation: &Attestation) -> Result<EnvelopeSignature> {
        let message = pae(PAYLOAD_TYPE, &attestation.canonical_payload()?);
        let signature = self.signing_key.sign(&message);
        Ok(EnvelopeSignature {
            keyid: self.key_id.clone(),
            sig: STANDARD.encode(signature.to_bytes()),
        })
    }

    /// Returns `attestation` with this signer's signature appended.
    ///
    /// # Errors
    ///
    /// Same as [`EnvelopeSigner::sign`].
    pub fn sign_attestation(&self, mut attestation: Attestation) -> Result<Attestation> {
        let signature = self.sign(&attestation)?;
        attestation.signatures.push(signature);
        Ok(attestation)
    }
}

/// Verifies DSSE signatures against a fixed set of trusted keys.
#[derive(Debug, Clone, Default)]
pub struct Ed25519SignatureVerifier {
    trusted: HashMap<String, VerifyingKey>,
}

impl Ed25519SignatureVerifier {
    /// Creates a verifier trusting `keys`.
    pub fn new<I: IntoIterator<Item = VerifyingKey>>(keys: I) -> Self {
        let trusted = keys.into_iter().map(|key| (key_id(&key), key)).collect();
        Self { trusted }
    }

    /// Returns the number of trusted keys.
    pub fn trusted_keys(&self) -> usize {
        self.trusted.len()
    }

    /// Returns true if any signature is valid for a trusted key.
    ///
    /// Signatures from unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::InvalidSignature` if a signature from a
    /// trusted key cannot be decoded.
    pub fn verify_signatures(&self, attestation: &Attestation) -> Result<bool> {
        let message = pae(PAYLOAD_TYPE, &attestation.canonical_payload()?);

        for envelope in &attestation.signatures {
            let Some(key) = self.trusted.get(&envelope.keyid) else {
                continue;
            };
            let bytes = STANDARD
                .decode(&envelope.sig)
                .map_err(|e| IntegrityError::InvalidSignature { message: e.to_string() })?;
            let signature = Signature::from_slice(&bytes)
                .map_err(|e| IntegrityError::InvalidSignature { message: e.to_string() })?;
            if key.verify(&message, &signature).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519SignatureVerifier {
    async fn verify(&self, attestation: &Attestation) -> CollaboratorResult<bool> {
        self.verify_signatures(attestation).map_err(|e| CollaboratorError::rejected(e.to_string()))
    }
}
