//! Window definitions and time-based window assignment.
//!
//! Tumbling and sliding windows are aligned to the Unix epoch: a tumbling
//! window of size `s` covers `[k·s, (k+1)·s)` and a sliding window with slide
//! `d` covers `[k·d, k·d + s)`. Bounds are half-open, so a record exactly on
//! a boundary belongs to the later window. Session windows have no fixed
//! bounds and are tracked by the accumulator.

use chrono::{DateTime, Duration, TimeZone, Utc};
use makoto_core::{
    attestation::{TimeAlignment, WindowDescriptor},
    duration, WindowKind,
};

use crate::error::{Result, StreamError};

/// Immutable window definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    kind: WindowKind,
    size: Duration,
    slide: Option<Duration>,
    gap: Option<Duration>,
}

impl WindowSpec {
    /// Creates a window definition.
    ///
    /// Tumbling windows need `size`; sliding windows need `size` and a
    /// `slide` no larger than `size`; session windows need `gap`, which also
    /// serves as their nominal size.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` if a required interval is
    /// missing, non-positive, below one millisecond, or does not apply to
    /// `kind`.
    pub fn new(
        kind: WindowKind,
        size: Option<Duration>,
        slide: Option<Duration>,
        gap: Option<Duration>,
    ) -> Result<Self> {
        for (name, value) in [("size", size), ("slide", slide), ("gap", gap)] {
            if let Some(value) = value {
                if value.num_milliseconds() < 1 {
                    return Err(StreamError::configuration(format!(
                        "window {name} must be at least one millisecond"
                    )));
                }
            }
        }

        match kind {
            WindowKind::Tumbling => {
                let size = size.ok_or_else(|| missing("tumbling", "size"))?;
                reject(slide, "tumbling", "slide")?;
                reject(gap, "tumbling", "gap")?;
                Ok(Self { kind, size, slide: None, gap: None })
            },
            WindowKind::Sliding => {
                let size = size.ok_or_else(|| missing("sliding", "size"))?;
                let slide = slide.ok_or_else(|| missing("sliding", "slide"))?;
                reject(gap, "sliding", "gap")?;
                if slide > size {
                    return Err(StreamError::configuration(
                        "sliding window slide must not exceed its size",
                    ));
                }
                Ok(Self { kind, size, slide: Some(slide), gap: None })
            },
            WindowKind::Session => {
                let gap = gap.ok_or_else(|| missing("session", "gap"))?;
                reject(slide, "session", "slide")?;
                Ok(Self { kind, size: size.unwrap_or(gap), slide: None, gap: Some(gap) })
            },
        }
    }

    /// Tumbling windows of `size`.
    ///
    /// # Errors
    ///
    /// See [`WindowSpec::new`].
    pub fn tumbling(size: Duration) -> Result<Self> {
        Self::new(WindowKind::Tumbling, Some(size), None, None)
    }

    /// Sliding windows of `size` starting every `slide`.
    ///
    /// # Errors
    ///
    /// See [`WindowSpec::new`].
    pub fn sliding(size: Duration, slide: Duration) -> Result<Self> {
        Self::new(WindowKind::Sliding, Some(size), Some(slide), None)
    }

    /// Session windows closed by `gap` of inactivity.
    ///
    /// # Errors
    ///
    /// See [`WindowSpec::new`].
    pub fn session(gap: Duration) -> Result<Self> {
        Self::new(WindowKind::Session, None, None, Some(gap))
    }

    /// Parses a window definition from ISO 8601 intervals.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Core` for malformed durations and
    /// `StreamError::Configuration` as in [`WindowSpec::new`].
    pub fn parse(
        kind: WindowKind,
        size: Option<&str>,
        slide: Option<&str>,
        gap: Option<&str>,
    ) -> Result<Self> {
        let parse = |value: Option<&str>| value.map(duration::parse).transpose();
        Self::new(kind, parse(size)?, parse(slide)?, parse(gap)?)
    }

    /// Returns the window kind.
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Returns the window size (the gap for session windows).
    pub fn size(&self) -> Duration {
        self.size
    }

    /// Returns the slide interval of sliding windows.
    pub fn slide(&self) -> Option<Duration> {
        self.slide
    }

    /// Returns the inactivity gap of session windows.
    pub fn gap(&self) -> Option<Duration> {
        self.gap
    }

    /// Returns the `[start, end)` bounds of every fixed window containing
    /// `event_time`, ordered by start.
    ///
    /// Session windows return an empty list.
    pub fn assign(&self, event_time: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let t = event_time.timestamp_millis();
        let size = self.size.num_milliseconds();

        match self.kind {
            WindowKind::Tumbling => {
                let start = t.div_euclid(size) * size;
                bounds(start, size).into_iter().collect()
            },
            WindowKind::Sliding => {
                let slide = self.slide.map_or(size, |s| s.num_milliseconds());
                let last = t.div_euclid(slide) * slide;
                let mut windows = Vec::new();
                let mut start = last;
                while start > t - size {
                    windows.extend(bounds(start, size));
                    start -= slide;
                }
                windows.reverse();
                windows
            },
            WindowKind::Session => Vec::new(),
        }
    }

    /// Describes the window for a stream-window attestation.
    pub fn descriptor(
        &self,
        allowed_lateness: Duration,
        watermark: Option<DateTime<Utc>>,
    ) -> WindowDescriptor {
        WindowDescriptor {
            kind: self.kind,
            duration: duration::format(self.size),
            slide: self.slide.map(duration::format),
            gap: self.gap.map(duration::format),
            alignment: Some(TimeAlignment::EventTime),
            watermark,
            allowed_lateness: Some(duration::format(allowed_lateness)),
        }
    }
}

fn bounds(start_ms: i64, size_ms: i64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.timestamp_millis_opt(start_ms).single()?;
    let end = Utc.timestamp_millis_opt(start_ms.checked_add(size_ms)?).single()?;
    Some((start, end))
}

fn missing(kind: &str, field: &str) -> StreamError {
    StreamError::configuration(format!("{kind} windows require a {field}"))
}

fn reject(value: Option<Duration>, kind: &str, field: &str) -> Result<()> {
    match value {
        Some(_) => Err(StreamError::configuration(format!("{kind} windows do not take a {field}"))),
        None => Ok(()),
    }
}
