//! Error types for window accumulation and sealing.
//!
//! Late records are never errors: they are reported through
//! `WindowAssignment::LateRecordDropped` and counted in stream metrics.
//! Errors here cover misconfiguration, unknown streams, sealing failures and
//! worker lifecycle problems.

use std::{fmt, time::Duration};

use makoto_core::{CoreError, StreamId, WindowId};
use makoto_integrity::IntegrityError;
use thiserror::Error;

/// Result type alias for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors raised by the accumulator, sealer and engine.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Window or stream configuration is invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// What is wrong with the configuration
        message: String,
    },

    /// The stream was never registered.
    #[error("unknown stream {stream_id}")]
    UnknownStream {
        /// Stream that was addressed
        stream_id: StreamId,
    },

    /// The stream is already registered.
    #[error("stream {stream_id} is already registered")]
    StreamAlreadyRegistered {
        /// Stream that was registered twice
        stream_id: StreamId,
    },

    /// The seal queue no longer accepts closed windows.
    #[error("seal queue closed")]
    SealQueueClosed,

    /// Tree construction, linking or persistence failed.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A domain value could not be constructed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The blocking tree build task did not complete.
    #[error("tree build for {window_id} aborted: {error}")]
    BuildAborted {
        /// Window being built
        window_id: WindowId,
        /// Join error message
        error: String,
    },

    /// Sealing was cancelled before the window was linked.
    #[error("sealing cancelled")]
    Cancelled,

    /// The engine was started twice.
    #[error("stream engine already started")]
    AlreadyStarted,

    /// Sealer worker task panicked.
    #[error("sealer worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Worker that panicked
        worker_id: usize,
        /// Join error message
        error: String,
    },

    /// Workers did not drain the queue before the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },
}

impl StreamError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an unknown-stream error.
    pub fn unknown_stream(stream_id: &StreamId) -> Self {
        Self::UnknownStream { stream_id: stream_id.clone() }
    }

    /// Returns true if sealing the same window again may succeed.
    ///
    /// Only store outages qualify; chain and input faults are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Integrity(e) => e.is_retryable(),
            Self::Configuration { .. }
            | Self::UnknownStream { .. }
            | Self::StreamAlreadyRegistered { .. }
            | Self::SealQueueClosed
            | Self::Core(_)
            | Self::BuildAborted { .. }
            | Self::Cancelled
            | Self::AlreadyStarted
            | Self::WorkerPanic { .. }
            | Self::ShutdownTimeout { .. } => false,
        }
    }
}

/// Category of stream error for logs and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller supplied something invalid.
    Input,
    /// Chain or tree integrity fault.
    Integrity,
    /// Window store failure.
    Store,
    /// Lifecycle or internal failure.
    Internal,
}

impl From<&StreamError> for ErrorCategory {
    fn from(error: &StreamError) -> Self {
        match error {
            StreamError::Configuration { .. }
            | StreamError::UnknownStream { .. }
            | StreamError::StreamAlreadyRegistered { .. }
            | StreamError::Core(_) => Self::Input,
            StreamError::Integrity(IntegrityError::Store { .. }) => Self::Store,
            StreamError::Integrity(e) if e.is_input_error() => Self::Input,
            StreamError::Integrity(_) => Self::Integrity,
            StreamError::SealQueueClosed
            | StreamError::BuildAborted { .. }
            | StreamError::Cancelled
            | StreamError::AlreadyStarted
            | StreamError::WorkerPanic { .. }
            | StreamError::ShutdownTimeout { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Integrity => write!(f, "integrity"),
            Self::Store => write!(f, "store"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use makoto_core::CollaboratorError;

    use super::*;

    fn window_id() -> WindowId {
        let start = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        WindowId::new(StreamId::from("s"), start, start + chrono::Duration::minutes(1)).unwrap()
    }

    #[test]
    fn only_store_outages_are_retryable() {
        let outage =
            StreamError::from(IntegrityError::from(CollaboratorError::unavailable("down")));
        assert!(outage.is_retryable());

        let missing =
            StreamError::from(IntegrityError::UnknownPreviousWindow { window_id: window_id() });
        assert!(!missing.is_retryable());
        assert!(!StreamError::Cancelled.is_retryable());
        assert!(!StreamError::configuration("zero workers").is_retryable());
    }

    #[test]
    fn categories_follow_error_kind() {
        assert_eq!(
            ErrorCategory::from(&StreamError::unknown_stream(&StreamId::from("x"))),
            ErrorCategory::Input
        );
        assert_eq!(
            ErrorCategory::from(&StreamError::from(IntegrityError::EmptyInput)),
            ErrorCategory::Input
        );
        assert_eq!(
            ErrorCategory::from(&StreamError::from(IntegrityError::broken_chain_link(
                window_id(),
                "root mismatch"
            ))),
            ErrorCategory::Integrity
        );
        assert_eq!(
            ErrorCategory::from(&StreamError::from(IntegrityError::from(
                CollaboratorError::rejected("duplicate")
            ))),
            ErrorCategory::Store
        );
        assert_eq!(ErrorCategory::from(&StreamError::SealQueueClosed), ErrorCategory::Internal);
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            StreamError::unknown_stream(&StreamId::from("sensors")).to_string(),
            "unknown stream sensors"
        );
        assert_eq!(ErrorCategory::Store.to_string(), "store");
    }
}
