//! Core domain models and strongly-typed identifiers.
//!
//! Defines digests, hash algorithms, trust levels, stream and window
//! identifiers, and the sealed-window record that ties a Merkle tree head to
//! its chain link. Identifiers are newtypes so a stream id can never be passed
//! where a window id is expected.

use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};

/// Largest digest supported by any [`HashAlgorithm`] (SHA-512).
pub const MAX_DIGEST_LEN: usize = 64;

/// Digest algorithm used for leaves and internal Merkle nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
    /// BLAKE3 with 32-byte output.
    Blake3,
}

impl HashAlgorithm {
    /// Returns the digest length in bytes.
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Returns the wire name of the algorithm.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            _ => Err(CoreError::UnsupportedAlgorithm { name: s.to_string() }),
        }
    }
}

/// Fixed-capacity digest value.
///
/// Holds up to [`MAX_DIGEST_LEN`] bytes inline so hashing a leaf never
/// allocates. Serialized as a lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    len: u8,
    bytes: [u8; MAX_DIGEST_LEN],
}

impl Digest {
    /// Creates a digest from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDigest` if `bytes` is empty or longer than
    /// [`MAX_DIGEST_LEN`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(CoreError::invalid_digest("digest is empty"));
        }
        if bytes.len() > MAX_DIGEST_LEN {
            return Err(CoreError::invalid_digest(format!(
                "digest is {} bytes, maximum is {MAX_DIGEST_LEN}",
                bytes.len()
            )));
        }
        let len = u8::try_from(bytes.len())
            .map_err(|_| CoreError::invalid_digest("digest length overflow"))?;

        let mut buf = [0u8; MAX_DIGEST_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { len, bytes: buf })
    }

    /// Parses a digest from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDigest` for malformed hex or bad lengths.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CoreError::invalid_digest(format!("invalid hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Wraps raw hash function output.
    ///
    /// Bytes beyond [`MAX_DIGEST_LEN`] are ignored; every supported
    /// algorithm produces at most that many.
    pub fn from_output(output: &[u8]) -> Self {
        let len = output.len().min(MAX_DIGEST_LEN);
        let mut buf = [0u8; MAX_DIGEST_LEN];
        buf[..len].copy_from_slice(&output[..len]);
        Self { len: u8::try_from(len).unwrap_or(u8::MAX), bytes: buf }
    }

    /// Returns the digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Returns the digest length in bytes.
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Returns true if the digest holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the length matches the algorithm's output length.
    pub fn fits(&self, algorithm: HashAlgorithm) -> bool {
        self.len() == algorithm.output_len()
    }

    /// Returns the lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self::from_output(&bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        Self::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}

/// Makoto assurance level.
///
/// Ordered `L1 < L2 < L3`. The level of any consumer is bounded by the
/// weakest verified level among its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Provenance exists.
    L1,
    /// Provenance is signed and authenticated.
    L2,
    /// Provenance is produced by a hardened, isolated platform.
    L3,
}

impl Level {
    /// Returns true if a claim at this level must carry a valid signature.
    pub const fn requires_signature(self) -> bool {
        matches!(self, Self::L2 | Self::L3)
    }

    /// Returns the weakest level, or `None` for an empty set.
    pub fn weakest<I: IntoIterator<Item = Self>>(levels: I) -> Option<Self> {
        levels.into_iter().min()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
        }
    }
}

/// Strongly-typed stream identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a stream id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Window partitioning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Fixed-size, non-overlapping windows.
    Tumbling,
    /// Fixed-size windows advancing by a slide interval; may overlap.
    Sliding,
    /// Activity windows separated by an inactivity gap.
    Session,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tumbling => write!(f, "tumbling"),
            Self::Sliding => write!(f, "sliding"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// Window identity: `(stream_id, window_start, window_end)`.
///
/// Rendered as `<stream>@<start>/<end>` with RFC 3339 millisecond
/// timestamps, e.g. `sensors@2024-01-01T00:00:00.000Z/2024-01-01T00:01:00.000Z`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WindowId {
    stream_id: StreamId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl WindowId {
    /// Creates a window id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidWindowId` if `end` is not after `start` or
    /// the stream id is empty.
    pub fn new(stream_id: StreamId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start || stream_id.as_str().is_empty() {
            return Err(CoreError::InvalidWindowId {
                value: format!("{stream_id}@{}/{}", format_instant(start), format_instant(end)),
            });
        }
        Ok(Self { stream_id, start, end })
    }

    /// Returns the owning stream.
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Returns the inclusive window start.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the exclusive window end.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.stream_id, format_instant(self.start), format_instant(self.end))
    }
}

impl FromStr for WindowId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidWindowId { value: s.to_string() };

        let (stream, range) = s.rsplit_once('@').ok_or_else(invalid)?;
        let (start, end) = range.split_once('/').ok_or_else(invalid)?;
        let start = DateTime::parse_from_rfc3339(start).map_err(|_| invalid())?;
        let end = DateTime::parse_from_rfc3339(end).map_err(|_| invalid())?;

        Self::new(StreamId::from(stream), start.with_timezone(&Utc), end.with_timezone(&Utc))
    }
}

impl TryFrom<String> for WindowId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WindowId> for String {
    fn from(id: WindowId) -> Self {
        id.to_string()
    }
}

/// Summary of a built Merkle tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeHead {
    /// Algorithm used for leaves and internal nodes.
    pub algorithm: HashAlgorithm,
    /// Root digest.
    pub root: Digest,
    /// Number of levels, counting the leaf level and the root.
    pub height: u32,
    /// Number of leaves.
    pub leaf_count: u64,
}

/// Link from a closed window to its predecessor in the same stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    /// Predecessor window, absent for the genesis window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_window_id: Option<WindowId>,
    /// Root stored for the predecessor window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_merkle_root: Option<Digest>,
    /// 1-based position in the chain.
    pub chain_length: u64,
    /// First window of the chain.
    pub genesis_window_id: WindowId,
}

impl ChainLink {
    /// Creates the link for a genesis window.
    pub fn genesis(window_id: WindowId) -> Self {
        Self {
            previous_window_id: None,
            previous_merkle_root: None,
            chain_length: 1,
            genesis_window_id: window_id,
        }
    }

    /// Returns true if this link starts a chain.
    pub fn is_genesis(&self) -> bool {
        self.previous_window_id.is_none()
    }

    /// Checks the structural rules of a link without consulting any store.
    ///
    /// A genesis link has length 1 and no previous root; every other link has
    /// both a previous window and a previous root and a length of at least 2.
    pub fn is_well_formed(&self) -> bool {
        match (&self.previous_window_id, &self.previous_merkle_root) {
            (None, None) => self.chain_length == 1,
            (Some(_), Some(_)) => self.chain_length >= 2,
            _ => false,
        }
    }
}

/// A closed, immutable window as persisted by the sealing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedWindow {
    /// Window identity.
    pub window_id: WindowId,
    /// Partitioning strategy that produced the window.
    pub kind: WindowKind,
    /// Merkle tree summary over the window's leaves.
    pub tree: TreeHead,
    /// Link to the previous window of the stream.
    pub chain: ChainLink,
    /// Accepted records that arrived behind the watermark.
    pub late_records: u64,
    /// Records dropped on the stream since the previous window closed.
    pub dropped_records: u64,
    /// Earliest event time among the window's records.
    pub first_event_at: DateTime<Utc>,
    /// Latest event time among the window's records.
    pub last_event_at: DateTime<Utc>,
    /// When the window was sealed.
    pub sealed_at: DateTime<Utc>,
}
