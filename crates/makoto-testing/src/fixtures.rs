//! Attestation builders and lineage fixtures.
//!
//! Every fixture is named; its subject digest and attestation reference are
//! derived from the name, so tests wire lineage graphs by name alone.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use makoto_core::{
    attestation::{
        CollectorInfo, Dataset, DbomSource, DbomTransformation, ExecutorInfo, InputReference,
        OriginInfo, OriginPredicate, TransformInfo, TransformPredicate,
    },
    Attestation, AttestationBody, AttestationRef, Dbom, DigestSet, HashAlgorithm, Level,
    Predicate, Statement, Subject,
};
use makoto_integrity::{hasher, EnvelopeSigner, MemoryAttestationStore};

/// Fixed timestamp used by fixtures.
pub fn fixture_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default()
}

/// Returns the SHA-256 digest set derived from `name`.
pub fn digest_of(name: &str) -> DigestSet {
    DigestSet::of(HashAlgorithm::Sha256, &hasher::digest(HashAlgorithm::Sha256, name.as_bytes()))
}

/// Returns the reference under which the fixture `name` is stored.
pub fn reference(name: &str) -> AttestationRef {
    AttestationRef::new(format!("att:{name}"))
}

/// Builds an origin statement for `name` claiming `level`.
pub fn origin(name: &str, level: Level) -> Attestation {
    let predicate = Predicate::Origin(OriginPredicate {
        origin: OriginInfo {
            source: format!("https://data.example.com/{name}"),
            source_type: "api".to_string(),
            collection_method: "pull".to_string(),
            collection_timestamp: fixture_time(),
            geography: None,
        },
        collector: CollectorInfo {
            id: "collector-test".to_string(),
            platform: None,
            location: None,
        },
    });
    statement(name, predicate, level)
}

fn statement(name: &str, predicate: Predicate, level: Level) -> Attestation {
    let body = Statement::new(vec![Subject::new(name, digest_of(name))], predicate)
        .map(AttestationBody::Statement);
    match body {
        Ok(body) => Attestation::new(body, level),
        Err(e) => panic!("fixture {name} is not a valid statement: {e}"),
    }
}

/// Builder for transform statements.
#[derive(Debug, Clone)]
pub struct TransformBuilder {
    name: String,
    level: Level,
    inputs: Vec<InputReference>,
}

impl TransformBuilder {
    /// Starts a transform producing `name`, claiming L1.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), level: Level::L1, inputs: Vec::new() }
    }

    /// Sets the claimed level.
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds an input resolved through the fixture named `name`.
    #[must_use]
    pub fn input(self, name: &str) -> Self {
        self.input_with_digest(name, digest_of(name))
    }

    /// Adds an attested input whose expected digest is `digest`.
    #[must_use]
    pub fn input_with_digest(mut self, name: &str, digest: DigestSet) -> Self {
        self.inputs.push(InputReference {
            name: name.to_string(),
            digest,
            attestation_ref: Some(reference(name)),
            makoto_level: None,
        });
        self
    }

    /// Adds an input resolved through an explicit reference.
    #[must_use]
    pub fn input_ref(mut self, name: &str, digest: DigestSet, attestation: AttestationRef) -> Self {
        self.inputs.push(InputReference {
            name: name.to_string(),
            digest,
            attestation_ref: Some(attestation),
            makoto_level: None,
        });
        self
    }

    /// Adds an input without an attestation reference.
    #[must_use]
    pub fn unattested_input(mut self, name: &str) -> Self {
        self.inputs.push(InputReference {
            name: name.to_string(),
            digest: digest_of(name),
            attestation_ref: None,
            makoto_level: None,
        });
        self
    }

    /// Builds the attestation.
    pub fn build(self) -> Attestation {
        let predicate = Predicate::Transform(TransformPredicate {
            inputs: self.inputs,
            transform: TransformInfo {
                transform_type: "https://makoto.dev/transforms/test".to_string(),
                name: format!("produce {}", self.name),
                version: Some("1.0.0".to_string()),
            },
            executor: ExecutorInfo { id: "executor-test".to_string(), platform: None },
        });
        statement(&self.name, predicate, self.level)
    }
}

/// Builder for DBOMs.
#[derive(Debug, Clone)]
pub struct DbomBuilder {
    dataset: String,
    level: Level,
    sources: Vec<DbomSource>,
    transformations: Vec<DbomTransformation>,
}

impl DbomBuilder {
    /// Starts a DBOM describing `dataset`, claiming L1.
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            level: Level::L1,
            sources: Vec::new(),
            transformations: Vec::new(),
        }
    }

    /// Sets the claimed level.
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a source attested by the fixture `name`, declaring `level`.
    #[must_use]
    pub fn source(mut self, name: &str, level: Option<Level>) -> Self {
        self.sources.push(DbomSource {
            name: name.to_string(),
            attestation_ref: Some(reference(name)),
            attestation_type: Some(makoto_core::attestation::ORIGIN_PREDICATE_TYPE.to_string()),
            makoto_level: level,
            digest: Some(digest_of(name)),
        });
        self
    }

    /// Adds a transformation step attested by the fixture `name`.
    #[must_use]
    pub fn transformation(mut self, name: &str, level: Option<Level>) -> Self {
        let order = u32::try_from(self.transformations.len() + 1).unwrap_or(u32::MAX);
        self.transformations.push(DbomTransformation {
            order,
            name: name.to_string(),
            attestation_ref: Some(reference(name)),
            attestation_type: Some(makoto_core::attestation::TRANSFORM_PREDICATE_TYPE.to_string()),
            makoto_level: level,
            inputs: Vec::new(),
            outputs: vec![name.to_string()],
        });
        self
    }

    /// Builds the DBOM without wrapping it in an attestation.
    pub fn build_dbom(self) -> Dbom {
        let dataset = Dataset {
            name: self.dataset.clone(),
            version: Some("1.0.0".to_string()),
            created: Some(fixture_time()),
            digest: digest_of(&self.dataset),
            makoto_level: Some(self.level),
        };
        let id = format!("urn:dbom:{}", self.dataset);
        match Dbom::new(id, dataset, self.sources, self.transformations) {
            Ok(dbom) => dbom,
            Err(e) => panic!("fixture DBOM {} is invalid: {e}", self.dataset),
        }
    }

    /// Builds the attestation.
    pub fn build(self) -> Attestation {
        let level = self.level;
        Attestation::new(AttestationBody::Dbom(self.build_dbom()), level)
    }
}

/// In-memory lineage graph keyed by fixture name.
#[derive(Debug, Default)]
pub struct Lineage {
    store: Arc<MemoryAttestationStore>,
    signer: Option<Arc<EnvelopeSigner>>,
}

impl Lineage {
    /// Creates an empty lineage whose attestations stay unsigned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty lineage that signs every attestation added.
    pub fn signed_by(signer: Arc<EnvelopeSigner>) -> Self {
        Self { store: Arc::new(MemoryAttestationStore::new()), signer: Some(signer) }
    }

    /// Stores `attestation` under the reference of `name`, signing it if
    /// the lineage has a signer. Returns the stored attestation.
    pub fn add(&self, name: &str, attestation: Attestation) -> Attestation {
        let attestation = self.sign(attestation);
        self.store.insert(reference(name), attestation.clone());
        attestation
    }

    /// Signs `attestation` with the lineage's signer, if any.
    pub fn sign(&self, attestation: Attestation) -> Attestation {
        match &self.signer {
            Some(signer) => match signer.sign_attestation(attestation) {
                Ok(signed) => signed,
                Err(e) => panic!("fixture signing failed: {e}"),
            },
            None => attestation,
        }
    }

    /// Returns the backing store, which also resolves references.
    pub fn store(&self) -> Arc<MemoryAttestationStore> {
        self.store.clone()
    }
}
