//! Window accumulation and sealing for high-rate streams.
//!
//! Records are assigned to tumbling, sliding or session windows by event
//! time. When a stream's watermark passes a window's end plus the allowed
//! lateness, the window is frozen and sealed on a separate worker pool:
//!
//! 1. **Build** - Merkle tree over the window's leaves, on the blocking pool
//! 2. **Order** - wait until the stream's previous window is persisted
//! 3. **Link** - chain link to the previous window's root
//! 4. **Persist** - append-only write to the window store
//! 5. **Publish** - `WindowEvent::Sealed` with sample inclusion proofs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use makoto_core::{HashAlgorithm, NoOpEventHandler, RealClock, StreamId};
//! use makoto_integrity::MemoryWindowStore;
//! use makoto_stream::{EngineConfig, Record, StreamConfig, StreamEngine, WindowSpec};
//!
//! # async fn example() -> makoto_stream::Result<()> {
//! let store = Arc::new(MemoryWindowStore::new());
//! let mut engine = StreamEngine::new(
//!     store,
//!     EngineConfig::default(),
//!     Arc::new(RealClock::new()),
//!     Arc::new(NoOpEventHandler::new()),
//! );
//! engine.start().await?;
//!
//! let window = WindowSpec::tumbling(Duration::minutes(1))?;
//! engine.register_stream(StreamConfig::new(
//!     "sensors",
//!     window,
//!     Duration::seconds(5),
//!     None,
//!     HashAlgorithm::Sha256,
//! )?)?;
//! engine.ingest(&StreamId::from("sensors"), &Record::new("reading", Utc::now()))?;
//! engine.flush(&StreamId::from("sensors"))?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accumulator;
pub mod engine;
pub mod error;
pub mod sealer;
pub mod window;
mod worker_pool;

pub use accumulator::{
    ClosedWindow, Record, StreamConfig, StreamMetrics, WindowAccumulator, WindowAssignment,
    WindowSnapshot, WindowState,
};
pub use engine::{EngineConfig, EngineStats, StreamEngine};
pub use error::{ErrorCategory, Result, StreamError};
pub use sealer::{ChainBarrier, SealerSettings, WindowSealer};
pub use window::WindowSpec;

/// Default number of concurrent sealer workers.
pub const DEFAULT_SEAL_WORKERS: usize = 2;

/// Default number of sample inclusion proofs per sealed window.
pub const DEFAULT_SAMPLE_PROOFS: usize = 3;

/// Default time shutdown waits for queued windows, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
