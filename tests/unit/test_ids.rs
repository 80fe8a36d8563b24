//! Unit tests for time-ordered identifiers

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::thread;

use workbench_api::ids::{Id, IdError, IdGenerator};

#[test]
fn test_ids_sort_by_creation() {
    let ids: Vec<Id> = (0..1000).map(|_| Id::new()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn test_ids_are_unique_across_threads() {
    let generator = Arc::new(IdGenerator::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let generator = generator.clone();
            thread::spawn(move || (0..2500).map(|_| generator.next()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "duplicate id {}", id);
        }
    }
    assert_eq!(seen.len(), 10_000);
}

#[test]
fn test_clock_going_backwards_stays_monotonic() {
    // The clock is a plain fn pointer, so flip between two instants through a static.
    use std::sync::atomic::{AtomicU64, Ordering};
    static NOW: AtomicU64 = AtomicU64::new(2_000_000);
    fn clock() -> u64 {
        NOW.load(Ordering::SeqCst)
    }

    let generator = IdGenerator::with_clock(clock);
    let first = generator.next();
    NOW.store(1_000_000, Ordering::SeqCst);
    let second = generator.next();

    assert!(second > first);
    assert_eq!(second.timestamp_ms(), 2_000_000);
}

#[test]
fn test_timestamp_is_recoverable() {
    let id = Id::from_parts(1_700_000_123_456, 42);
    assert_eq!(id.timestamp_ms(), 1_700_000_123_456);
    assert_eq!(id.as_u128() & 0xff, 42);
}

#[test]
fn test_bytes_roundtrip() {
    let id = Id::new();
    let copy = Id::from_bytes(id.as_bytes()).unwrap();
    assert_eq!(id, copy);
}

#[test]
fn test_parse_errors() {
    assert!(matches!(Id::parse(""), Err(IdError::InvalidLength(0))));
    assert!(matches!(
        Id::from_bytes(&[1u8; 17]),
        Err(IdError::InvalidLength(17))
    ));
    assert!(matches!(
        Id::parse("zzzzzzzz-zzzz-zzzz-zzzz-zzzzzzzzzzzz"),
        Err(IdError::InvalidEncoding(_))
    ));
}

#[test]
fn test_nil_id() {
    assert!(Id::nil().is_nil());
    assert!(!Id::new().is_nil());
    assert!(Id::nil() < Id::new());
}

#[test]
fn test_serde_is_plain_string() {
    let id = Id::from_u128(1);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"00000000-0000-0000-0000-000000000001\"");
    let back: Id = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn test_btreemap_iterates_in_creation_order() {
    let generator = IdGenerator::with_clock(|| 5_000);
    let mut map = BTreeMap::new();
    let mut expected = Vec::new();
    for i in 0..20 {
        let id = generator.next();
        map.insert(id, i);
        expected.push(i);
    }
    assert_eq!(map.values().copied().collect::<Vec<_>>(), expected);
}
