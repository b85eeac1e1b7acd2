use chrono::{TimeZone, Utc};
use osh::event::{decode, encode, Event, MAX_PAYLOAD_SIZE};
use osh::log::{forward_write, insert, reverse_scan, DEFAULT_LOCK_WAIT};
use osh::merge::MergeReader;
use proptest::prelude::*;
use tempfile::tempdir;

fn arb_command() -> impl Strategy<Value = String> {
    ".{0,80}"
}

fn arb_event() -> impl Strategy<Value = Event> {
    (1_000_000_000i64..2_000_000_000i64, arb_command()).prop_map(|(ts, command)| {
        Event::new(Utc.timestamp_opt(ts, 0).unwrap(), command)
    })
}

// Every event that fits the frame limit round-trips through the codec
// with structural equality, per spec.md §8's encode/decode law.
proptest! {
    #[test]
    fn prop_codec_round_trip(event in arb_event()) {
        let payload = encode(&event).unwrap();
        prop_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        let decoded = decode(&payload).unwrap();
        prop_assert_eq!(event, decoded);
    }
}

// forward_write followed by reverse_scan yields the exact reverse of the
// written sequence, for any sorted event sequence.
proptest! {
    #[test]
    fn prop_forward_write_reverse_scan_is_reversed(
        mut timestamps in proptest::collection::vec(0i64..1_000_000i64, 0..30)
    ) {
        timestamps.sort();
        let events: Vec<Event> = timestamps
            .iter()
            .map(|&ts| Event::new(Utc.timestamp_opt(ts, 0).unwrap(), "cmd"))
            .collect();

        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        forward_write(&events, &path, DEFAULT_LOCK_WAIT).unwrap();

        let scanned: Vec<_> = reverse_scan(&path, DEFAULT_LOCK_WAIT)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        let mut expected = events;
        expected.reverse();
        prop_assert_eq!(scanned, expected);
    }
}

// insert() always leaves the file in non-decreasing timestamp order,
// regardless of the order events are inserted in.
proptest! {
    #[test]
    fn prop_insert_preserves_ordering(
        timestamps in proptest::collection::vec(0i64..1_000_000i64, 0..20)
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.osh");
        for &ts in &timestamps {
            insert(&Event::new(Utc.timestamp_opt(ts, 0).unwrap(), "cmd"), &path, DEFAULT_LOCK_WAIT).unwrap();
        }

        let scanned: Vec<_> = reverse_scan(&path, DEFAULT_LOCK_WAIT)
            .unwrap()
            .map(|e| e.unwrap().timestamp)
            .collect();
        let mut forward = scanned.clone();
        forward.reverse();
        let mut sorted = forward.clone();
        sorted.sort();
        prop_assert_eq!(forward, sorted);
        prop_assert_eq!(scanned.len(), timestamps.len());
    }
}

// The merge reader's output is always non-increasing in timestamp and its
// multiset equals the union of the (already sorted) input sources.
proptest! {
    #[test]
    fn prop_merge_is_sorted_union(
        sources in proptest::collection::vec(
            proptest::collection::vec(0i64..10_000i64, 0..15),
            0..5,
        )
    ) {
        let mut expected_total = 0usize;
        let iters: Vec<_> = sources
            .iter()
            .map(|ts| {
                let mut sorted = ts.clone();
                sorted.sort_by(|a, b| b.cmp(a));
                expected_total += sorted.len();
                sorted
                    .into_iter()
                    .map(|t| -> osh::error::Result<Event> {
                        Ok(Event::new(Utc.timestamp_opt(t, 0).unwrap(), "cmd"))
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
            })
            .collect();

        let merged: Vec<_> = MergeReader::new(iters)
            .map(|e| e.unwrap().timestamp)
            .collect();

        prop_assert_eq!(merged.len(), expected_total);
        let mut sorted_desc = merged.clone();
        sorted_desc.sort_by(|a, b| b.cmp(a));
        prop_assert_eq!(&merged, &sorted_desc);
    }
}
