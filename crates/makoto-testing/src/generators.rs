//! Record generators for stream tests and benchmarks.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use makoto_stream::Record;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Returns `count` distinct payloads `record-0`, `record-1`, ...
pub fn payloads(count: usize) -> Vec<Bytes> {
    (0..count).map(|i| Bytes::from(format!("record-{i}"))).collect()
}

/// Returns `count` records starting at `start`, spaced `step` apart.
pub fn timed_records(start: DateTime<Utc>, step: Duration, count: usize) -> Vec<Record> {
    let mut at = start;
    payloads(count)
        .into_iter()
        .map(|payload| {
            let record = Record::new(payload, at);
            at += step;
            record
        })
        .collect()
}

/// Returns [`timed_records`] in an arrival order shuffled by `seed`.
///
/// The same seed always yields the same order.
pub fn shuffled_records(
    start: DateTime<Utc>,
    step: Duration,
    count: usize,
    seed: u64,
) -> Vec<Record> {
    let mut records = timed_records(start, step, count);
    records.shuffle(&mut StdRng::seed_from_u64(seed));
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffling_is_reproducible() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let a = shuffled_records(start, Duration::seconds(1), 50, 7);
        let b = shuffled_records(start, Duration::seconds(1), 50, 7);
        let times = |records: &[Record]| records.iter().map(|r| r.event_time).collect::<Vec<_>>();
        assert_eq!(times(&a), times(&b));
        assert_eq!(a.len(), 50);
    }

    #[test]
    fn timed_records_are_evenly_spaced() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let records = timed_records(start, Duration::milliseconds(250), 4);
        assert_eq!(records[3].event_time - records[0].event_time, Duration::milliseconds(750));
    }
}
