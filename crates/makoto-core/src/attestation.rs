//! Attestation documents: in-toto statements and DBOMs.
//!
//! Documents are discriminated exactly once, when they are deserialized: a
//! statement's `predicateType` selects a [`Predicate`] variant and a
//! top-level `dbomVersion` selects [`AttestationBody::Dbom`]. Code that
//! consumes attestations matches on these variants and never inspects raw
//! JSON shape again.
//!
//! Construction goes through single fallible constructors
//! ([`Statement::new`], [`Dbom::new`]) that reject documents missing required
//! parts; there are no partially-built documents.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    error::{CoreError, Result},
    models::{ChainLink, Digest, HashAlgorithm, Level, StreamId, WindowKind},
};

/// in-toto Statement v1 `_type`.
pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v1";

/// Origin predicate type URI.
pub const ORIGIN_PREDICATE_TYPE: &str = "https://makoto.dev/origin/v1";

/// Transform predicate type URI.
pub const TRANSFORM_PREDICATE_TYPE: &str = "https://makoto.dev/transform/v1";

/// Stream window predicate type URI.
pub const STREAM_WINDOW_PREDICATE_TYPE: &str = "https://makoto.dev/stream-window/v1";

/// Supported DBOM schema version.
pub const DBOM_VERSION: &str = "1.0.0";

/// Weak reference to another attestation: an address to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttestationRef(String);

impl AttestationRef {
    /// Creates a reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttestationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttestationRef {
    fn from(reference: &str) -> Self {
        Self(reference.to_string())
    }
}

/// Set of digests identifying an artifact, keyed by algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSet {
    /// SHA-256 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// SHA-384 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha384: Option<String>,
    /// SHA-512 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    /// BLAKE3 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
    /// Merkle root of a record set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    /// Number of records covered by the digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<String>,
}

impl DigestSet {
    /// Creates a set holding a single SHA-256 digest.
    pub fn sha256(hex_digest: impl Into<String>) -> Self {
        Self { sha256: Some(hex_digest.into()), ..Self::default() }
    }

    /// Creates a set holding `digest` under `algorithm`.
    pub fn of(algorithm: HashAlgorithm, digest: &Digest) -> Self {
        let hex_digest = Some(digest.to_hex());
        match algorithm {
            HashAlgorithm::Sha256 => Self { sha256: hex_digest, ..Self::default() },
            HashAlgorithm::Sha384 => Self { sha384: hex_digest, ..Self::default() },
            HashAlgorithm::Sha512 => Self { sha512: hex_digest, ..Self::default() },
            HashAlgorithm::Blake3 => Self { blake3: hex_digest, ..Self::default() },
        }
    }

    fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("sha256", &self.sha256),
            ("sha384", &self.sha384),
            ("sha512", &self.sha512),
            ("blake3", &self.blake3),
            ("merkleRoot", &self.merkle_root),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
    }

    /// Returns true if no digest is present.
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Returns a stable identity string such as `sha256:ab12...`.
    ///
    /// Uses the strongest-preference algorithm present, in the order
    /// sha256, sha384, sha512, blake3, merkleRoot.
    pub fn identity(&self) -> Option<String> {
        self.entries().next().map(|(name, value)| format!("{name}:{}", value.to_ascii_lowercase()))
    }

    /// Returns true if both sets share at least one algorithm and agree on
    /// every shared algorithm.
    pub fn matches(&self, other: &Self) -> bool {
        let mut shared = 0;
        for (name, value) in self.entries() {
            if let Some((_, theirs)) = other.entries().find(|(n, _)| *n == name) {
                if !value.eq_ignore_ascii_case(theirs) {
                    return false;
                }
                shared += 1;
            }
        }
        shared > 0
    }
}

/// Artifact an attestation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Artifact name.
    pub name: String,
    /// Artifact digests.
    pub digest: DigestSet,
}

impl Subject {
    /// Creates a subject.
    pub fn new(name: impl Into<String>, digest: DigestSet) -> Self {
        Self { name: name.into(), digest }
    }
}

/// Kind of attestation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationKind {
    /// Origin predicate.
    Origin,
    /// Transform predicate.
    Transform,
    /// Stream window predicate.
    StreamWindow,
    /// Data bill of materials.
    Dbom,
}

impl fmt::Display for AttestationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin => write!(f, "origin"),
            Self::Transform => write!(f, "transform"),
            Self::StreamWindow => write!(f, "stream-window"),
            Self::Dbom => write!(f, "dbom"),
        }
    }
}

/// Collector or processor that produced an attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorInfo {
    /// Collector identifier (URI).
    pub id: String,
    /// Platform the collector ran on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Physical or logical location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Where and how data was collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginInfo {
    /// Source URI.
    pub source: String,
    /// Source category (api, database, sensor, ...).
    pub source_type: String,
    /// Collection method (pull, push, stream, ...).
    pub collection_method: String,
    /// When collection happened.
    pub collection_timestamp: DateTime<Utc>,
    /// Geographic region of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<String>,
}

/// Origin predicate: leaf-level provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginPredicate {
    /// Collection details.
    pub origin: OriginInfo,
    /// Collector identity.
    pub collector: CollectorInfo,
}

/// Input consumed by a transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputReference {
    /// Input dataset name.
    pub name: String,
    /// Input digests.
    pub digest: DigestSet,
    /// Attestation describing the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_ref: Option<AttestationRef>,
    /// Level declared for the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makoto_level: Option<Level>,
}

/// Transformation applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformInfo {
    /// Transform type URI.
    #[serde(rename = "type")]
    pub transform_type: String,
    /// Human-readable name.
    pub name: String,
    /// Transform version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// System that executed a transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    /// Executor identifier.
    pub id: String,
    /// Execution platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Transform predicate: derived data and its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformPredicate {
    /// Consumed inputs.
    pub inputs: Vec<InputReference>,
    /// Applied transformation.
    pub transform: TransformInfo,
    /// Executor identity.
    pub executor: ExecutorInfo,
}

/// Stream a window belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream identifier.
    pub id: StreamId,
    /// Source URI (mqtt://, kafka://, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Topic or channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Partitions included in the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<String>>,
}

/// Time domain used to align windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeAlignment {
    /// Wall-clock time.
    WallClock,
    /// Event time carried by records.
    EventTime,
    /// Processing time at the collector.
    ProcessingTime,
}

/// Window definition and boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDescriptor {
    /// Window kind.
    #[serde(rename = "type")]
    pub kind: WindowKind,
    /// Window size (ISO 8601).
    pub duration: String,
    /// Slide interval for sliding windows (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide: Option<String>,
    /// Inactivity gap for session windows (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<String>,
    /// Time alignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<TimeAlignment>,
    /// Stream watermark when the window closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<DateTime<Utc>>,
    /// Allowed lateness (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_lateness: Option<String>,
}

/// Merkle tree over the window's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleTreeDescriptor {
    /// Hash algorithm for leaves and nodes.
    pub algorithm: HashAlgorithm,
    /// Number of leaves.
    pub leaf_count: u64,
    /// Tree height, counting leaf and root levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_height: Option<u32>,
    /// Root digest.
    pub root: Digest,
}

/// Integrity section of a stream window predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityDescriptor {
    /// Merkle tree summary.
    pub merkle_tree: MerkleTreeDescriptor,
    /// Link to the previous window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainLink>,
}

/// Event-time statistics of a window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStatistics {
    /// Earliest record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_timestamp: Option<DateTime<Utc>>,
    /// Latest record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timestamp: Option<DateTime<Utc>>,
}

/// Aggregate statistics for a window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowAggregates {
    /// Event-time statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<WindowStatistics>,
}

/// Processing counters for a window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Accepted records that arrived behind the watermark.
    #[serde(default)]
    pub late_records: u64,
    /// Records dropped for exceeding allowed lateness.
    #[serde(default)]
    pub dropped_records: u64,
    /// Close-to-seal latency (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_latency: Option<String>,
}

/// Inclusion proof in hex wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProofDocument {
    /// Index of the proven leaf.
    pub leaf_index: u64,
    /// Hex leaf digest.
    pub leaf_hash: String,
    /// Hex sibling digests, leaf level first.
    pub siblings: Vec<String>,
    /// Sibling side per level: `"left"` or `"right"`.
    pub positions: Vec<String>,
}

/// Proof availability for a window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamVerification {
    /// Whether proofs can be requested.
    #[serde(default)]
    pub merkle_proof_available: bool,
    /// Where proofs can be requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_endpoint: Option<String>,
    /// Sample inclusion proofs checked against the attested root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_proofs: Vec<MerkleProofDocument>,
}

/// Stream window predicate: a bounded, Merkle-committed slice of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamWindowPredicate {
    /// Stream identity.
    pub stream: StreamDescriptor,
    /// Window definition.
    pub window: WindowDescriptor,
    /// Merkle tree and chain link.
    pub integrity: IntegrityDescriptor,
    /// Collector identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<CollectorInfo>,
    /// Aggregate statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<WindowAggregates>,
    /// Processing counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StreamMetadata>,
    /// Proof availability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<StreamVerification>,
}

/// Statement predicate, selected by `predicateType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `https://makoto.dev/origin/v1`.
    Origin(OriginPredicate),
    /// `https://makoto.dev/transform/v1`.
    Transform(TransformPredicate),
    /// `https://makoto.dev/stream-window/v1`.
    StreamWindow(Box<StreamWindowPredicate>),
}

impl Predicate {
    /// Returns the predicate type URI.
    pub const fn predicate_type(&self) -> &'static str {
        match self {
            Self::Origin(_) => ORIGIN_PREDICATE_TYPE,
            Self::Transform(_) => TRANSFORM_PREDICATE_TYPE,
            Self::StreamWindow(_) => STREAM_WINDOW_PREDICATE_TYPE,
        }
    }

    /// Returns the attestation kind.
    pub const fn kind(&self) -> AttestationKind {
        match self {
            Self::Origin(_) => AttestationKind::Origin,
            Self::Transform(_) => AttestationKind::Transform,
            Self::StreamWindow(_) => AttestationKind::StreamWindow,
        }
    }
}

/// in-toto Statement v1 carrying a Makoto predicate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawStatement")]
pub struct Statement {
    subject: Vec<Subject>,
    predicate: Predicate,
}

impl Statement {
    /// Creates a statement.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDocument` if there are no subjects or a
    /// subject has an empty name or no digest.
    pub fn new(subject: Vec<Subject>, predicate: Predicate) -> Result<Self> {
        if subject.is_empty() {
            return Err(CoreError::invalid_document("statement has no subject"));
        }
        if let Some(bad) = subject.iter().find(|s| s.name.is_empty() || s.digest.is_empty()) {
            return Err(CoreError::invalid_document(format!(
                "subject {:?} must have a name and at least one digest",
                bad.name
            )));
        }
        Ok(Self { subject, predicate })
    }

    /// Returns the subjects.
    pub fn subjects(&self) -> &[Subject] {
        &self.subject
    }

    /// Returns the first subject, which identifies the statement.
    pub fn primary_subject(&self) -> &Subject {
        // Non-empty by construction.
        &self.subject[0]
    }

    /// Returns the predicate.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Returns the attestation kind.
    pub fn kind(&self) -> AttestationKind {
        self.predicate.kind()
    }
}

#[derive(Deserialize)]
struct RawStatement {
    #[serde(rename = "_type")]
    statement_type: String,
    subject: Vec<Subject>,
    #[serde(rename = "predicateType")]
    predicate_type: String,
    predicate: serde_json::Value,
}

impl TryFrom<RawStatement> for Statement {
    type Error = CoreError;

    fn try_from(raw: RawStatement) -> Result<Self> {
        if raw.statement_type != STATEMENT_TYPE {
            return Err(CoreError::UnsupportedStatementType { statement_type: raw.statement_type });
        }

        let predicate = match raw.predicate_type.as_str() {
            ORIGIN_PREDICATE_TYPE => Predicate::Origin(serde_json::from_value(raw.predicate)?),
            TRANSFORM_PREDICATE_TYPE => {
                Predicate::Transform(serde_json::from_value(raw.predicate)?)
            },
            STREAM_WINDOW_PREDICATE_TYPE => {
                Predicate::StreamWindow(Box::new(serde_json::from_value(raw.predicate)?))
            },
            _ => {
                return Err(CoreError::UnsupportedPredicate { predicate_type: raw.predicate_type })
            },
        };

        Self::new(raw.subject, predicate)
    }
}

impl Serialize for Statement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Statement", 4)?;
        state.serialize_field("_type", STATEMENT_TYPE)?;
        state.serialize_field("subject", &self.subject)?;
        state.serialize_field("predicateType", self.predicate.predicate_type())?;
        match &self.predicate {
            Predicate::Origin(p) => state.serialize_field("predicate", p)?,
            Predicate::Transform(p) => state.serialize_field("predicate", p)?,
            Predicate::StreamWindow(p) => state.serialize_field("predicate", p)?,
        }
        state.end()
    }
}

/// Dataset described by a DBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Dataset name.
    pub name: String,
    /// Dataset version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Dataset digests.
    pub digest: DigestSet,
    /// Level claimed for the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makoto_level: Option<Level>,
}

/// Source dataset contributing to a DBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbomSource {
    /// Source name.
    pub name: String,
    /// Origin attestation for the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_ref: Option<AttestationRef>,
    /// Attestation type URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_type: Option<String>,
    /// Declared level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makoto_level: Option<Level>,
    /// Source digests, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSet>,
}

/// Transformation step recorded in a DBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbomTransformation {
    /// 1-based order in the transformation chain.
    pub order: u32,
    /// Step name.
    pub name: String,
    /// Transform attestation for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_ref: Option<AttestationRef>,
    /// Attestation type URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_type: Option<String>,
    /// Declared level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makoto_level: Option<Level>,
    /// Input dataset names.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output dataset names.
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Compliance summary of a DBOM.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compliance {
    /// Overall level claimed by the DBOM author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_makoto_level: Option<Level>,
    /// Free-text justification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_justification: Option<String>,
}

/// Data bill of materials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dbom {
    /// Schema version, always [`DBOM_VERSION`].
    pub dbom_version: String,
    /// Unique DBOM identifier.
    pub dbom_id: String,
    /// Described dataset.
    pub dataset: Dataset,
    /// Contributing sources.
    pub sources: Vec<DbomSource>,
    /// Transformation steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<DbomTransformation>,
    /// Compliance summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Compliance>,
}

impl Dbom {
    /// Creates a DBOM.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDocument` if the id is empty, there are no
    /// sources, the dataset has no digest, or transformation orders are not
    /// unique.
    pub fn new(
        dbom_id: impl Into<String>,
        dataset: Dataset,
        sources: Vec<DbomSource>,
        transformations: Vec<DbomTransformation>,
    ) -> Result<Self> {
        let dbom = Self {
            dbom_version: DBOM_VERSION.to_string(),
            dbom_id: dbom_id.into(),
            dataset,
            sources,
            transformations,
            compliance: None,
        };
        dbom.validate()?;
        Ok(dbom)
    }

    /// Checks the structural rules enforced by [`Dbom::new`].
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDocument` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.dbom_version != DBOM_VERSION {
            return Err(CoreError::invalid_document(format!(
                "unsupported dbomVersion {}",
                self.dbom_version
            )));
        }
        if self.dbom_id.is_empty() {
            return Err(CoreError::invalid_document("dbomId is empty"));
        }
        if self.dataset.digest.is_empty() {
            return Err(CoreError::invalid_document("dataset has no digest"));
        }
        if self.sources.is_empty() {
            return Err(CoreError::invalid_document("DBOM has no sources"));
        }
        let mut orders: Vec<u32> = self.transformations.iter().map(|t| t.order).collect();
        orders.sort_unstable();
        if orders.windows(2).any(|pair| pair[0] == pair[1]) || orders.first() == Some(&0) {
            return Err(CoreError::invalid_document(
                "transformation orders must be unique and 1-based",
            ));
        }
        Ok(())
    }

    /// Computes the weakest-link level over all sources and transformations.
    ///
    /// Returns `None` when any contributor declares no level, since an
    /// undeclared contributor cannot support any claim.
    pub fn calculate_overall_level(&self) -> Option<Level> {
        let declared = self
            .sources
            .iter()
            .map(|s| s.makoto_level)
            .chain(self.transformations.iter().map(|t| t.makoto_level));

        let mut weakest: Option<Level> = None;
        for level in declared {
            let level = level?;
            weakest = Some(weakest.map_or(level, |w| w.min(level)));
        }
        weakest
    }
}

/// Either an in-toto statement or a DBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttestationBody {
    /// in-toto statement.
    Statement(Statement),
    /// Data bill of materials.
    Dbom(Dbom),
}

impl AttestationBody {
    /// Returns the attestation kind.
    pub fn kind(&self) -> AttestationKind {
        match self {
            Self::Statement(statement) => statement.kind(),
            Self::Dbom(_) => AttestationKind::Dbom,
        }
    }

    /// Returns the digests identifying the attested artifact.
    pub fn subject_digest(&self) -> &DigestSet {
        match self {
            Self::Statement(statement) => &statement.primary_subject().digest,
            Self::Dbom(dbom) => &dbom.dataset.digest,
        }
    }
}

impl<'de> Deserialize<'de> for AttestationBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;
        if value.get("_type").is_some() {
            Statement::deserialize(value).map(Self::Statement).map_err(D::Error::custom)
        } else if value.get("dbomVersion").is_some() {
            let dbom = Dbom::deserialize(value).map_err(D::Error::custom)?;
            dbom.validate().map_err(D::Error::custom)?;
            Ok(Self::Dbom(dbom))
        } else {
            Err(D::Error::custom("document is neither an in-toto statement nor a DBOM"))
        }
    }
}

/// DSSE signature over an attestation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Key identifier.
    pub keyid: String,
    /// Base64 signature bytes.
    pub sig: String,
}

/// An attestation document together with its claimed level and signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// The document.
    pub body: AttestationBody,
    /// Level the producer claims.
    #[serde(rename = "makotoLevel")]
    pub claimed_level: Level,
    /// DSSE signatures over the canonical payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<EnvelopeSignature>,
}

/// One edge of the lineage graph, as declared by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageInput {
    /// Input name.
    pub name: String,
    /// Digest the consumer expects the input to have.
    pub digest: Option<DigestSet>,
    /// Where the input's attestation can be resolved.
    pub attestation_ref: Option<AttestationRef>,
    /// Level the consumer declares for the input.
    pub declared_level: Option<Level>,
}

impl Attestation {
    /// Creates an unsigned attestation.
    pub fn new(body: AttestationBody, claimed_level: Level) -> Self {
        Self { body, claimed_level, signatures: Vec::new() }
    }

    /// Returns the attestation kind.
    pub fn kind(&self) -> AttestationKind {
        self.body.kind()
    }

    /// Returns the subject identity. Verifier nodes are keyed by it together
    /// with the attestation kind and a fingerprint of the document.
    pub fn identity(&self) -> Option<String> {
        self.body.subject_digest().identity()
    }

    /// Returns the canonical bytes covered by signatures.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the body cannot be encoded.
    pub fn canonical_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.body)?)
    }

    /// Returns the lineage inputs this attestation depends on.
    pub fn inputs(&self) -> Vec<LineageInput> {
        match &self.body {
            AttestationBody::Statement(statement) => match statement.predicate() {
                Predicate::Transform(transform) => transform
                    .inputs
                    .iter()
                    .map(|input| LineageInput {
                        name: input.name.clone(),
                        digest: Some(input.digest.clone()),
                        attestation_ref: input.attestation_ref.clone(),
                        declared_level: input.makoto_level,
                    })
                    .collect(),
                Predicate::Origin(_) | Predicate::StreamWindow(_) => Vec::new(),
            },
            AttestationBody::Dbom(dbom) => dbom
                .sources
                .iter()
                .map(|source| LineageInput {
                    name: source.name.clone(),
                    digest: source.digest.clone(),
                    attestation_ref: source.attestation_ref.clone(),
                    declared_level: source.makoto_level,
                })
                .chain(dbom.transformations.iter().map(|step| LineageInput {
                    name: step.name.clone(),
                    digest: None,
                    attestation_ref: step.attestation_ref.clone(),
                    declared_level: step.makoto_level,
                }))
                .collect(),
        }
    }
}
