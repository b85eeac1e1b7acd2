//! k-way merge of reverse-scanning event iterators into one newest-first
//! stream.
//!
//! Each source is already ordered newest-first on its own ([`crate::log`]'s
//! `reverse_scan`, or the sorted output of a legacy reader). The merge is a
//! heap-driven pull: only the iterator whose head is chosen advances, so a
//! caller that stops early never pays to read the rest of any source.

use crate::error::Result;
use crate::event::Event;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One entry on the heap: an event plus the index of the source it came
/// from, so iterators advance in their original registration order and
/// ties within a timestamp break deterministically per run (`spec.md` §9
/// leaves the tie order itself unspecified; this just makes it stable).
struct HeapEntry {
    event: Event,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.event.timestamp == other.event.timestamp && self.source == other.source
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; newest-first means the latest timestamp
        // must sort greatest. Break ties by source so registration order
        // decides who comes first among equal timestamps.
        self.event
            .timestamp
            .cmp(&other.event.timestamp)
            .then_with(|| other.source.cmp(&self.source))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge N newest-first iterators into a single newest-first stream.
///
/// Lazy: `next()` pulls from exactly one underlying iterator per call (the
/// one whose current head won the comparison), so iterating partway never
/// touches sources that weren't needed yet.
pub struct MergeReader<I> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
}

impl<I> MergeReader<I>
where
    I: Iterator<Item = Result<Event>>,
{
    pub fn new(sources: Vec<I>) -> Self {
        MergeReader {
            sources,
            heap: BinaryHeap::new(),
            primed: false,
        }
    }

    fn prime(&mut self) -> Result<()> {
        for (index, source) in self.sources.iter_mut().enumerate() {
            if let Some(result) = source.next() {
                self.heap.push(HeapEntry {
                    event: result?,
                    source: index,
                });
            }
        }
        self.primed = true;
        Ok(())
    }
}

impl<I> Iterator for MergeReader<I>
where
    I: Iterator<Item = Result<Event>>,
{
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            if let Err(e) = self.prime() {
                return Some(Err(e));
            }
        }

        let HeapEntry { event, source } = self.heap.pop()?;
        match self.sources[source].next() {
            Some(Ok(next_event)) => self.heap.push(HeapEntry {
                event: next_event,
                source,
            }),
            Some(Err(e)) => return Some(Err(e)),
            None => {}
        }
        Some(Ok(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event_at(ts: i64) -> Result<Event> {
        Ok(Event::new(Utc.timestamp_opt(ts, 0).unwrap(), "cmd"))
    }

    fn timestamps(reader: MergeReader<std::vec::IntoIter<Result<Event>>>) -> Vec<i64> {
        reader.map(|e| e.unwrap().timestamp.timestamp()).collect()
    }

    #[test]
    fn merges_three_sources_newest_first() {
        // scenario 4 from spec.md §8
        let a = vec![event_at(5), event_at(3), event_at(1)].into_iter();
        let b = vec![event_at(4), event_at(2)].into_iter();
        let c = vec![event_at(6)].into_iter();

        let merged = MergeReader::new(vec![a, b, c]);
        assert_eq!(timestamps(merged), vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn empty_sources_yield_nothing() {
        let a: std::vec::IntoIter<Result<Event>> = vec![].into_iter();
        let b: std::vec::IntoIter<Result<Event>> = vec![].into_iter();
        let merged = MergeReader::new(vec![a, b]);
        assert_eq!(timestamps(merged), Vec::<i64>::new());
    }

    #[test]
    fn single_source_passes_through_unchanged() {
        let a = vec![event_at(3), event_at(2), event_at(1)].into_iter();
        let merged = MergeReader::new(vec![a]);
        assert_eq!(timestamps(merged), vec![3, 2, 1]);
    }

    #[test]
    fn propagates_corrupt_frame_errors_from_a_source() {
        use crate::error::OshError;
        use std::path::PathBuf;

        let a = vec![
            event_at(2),
            Err(OshError::CorruptFrame {
                path: PathBuf::from("x.osh"),
                detail: "bad".to_string(),
            }),
        ]
        .into_iter();
        let mut merged = MergeReader::new(vec![a]);
        assert!(merged.next().unwrap().is_ok());
        assert!(merged.next().unwrap().is_err());
    }
}
