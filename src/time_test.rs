//! # Time Test Suite
//!
//! Intervals, temporal objects and the predicate helpers operators plug into
//! their sweep areas.

use crate::error::InvalidInterval;
use crate::time::{
  INFINITY, TemporalObject, TimeInterval, ends_before, interval_overlap, start_order,
  starts_at_or_before, value_equivalent,
};
use std::cmp::Ordering;

fn interval(start: u64, end: u64) -> TimeInterval {
  TimeInterval::new(start, end).unwrap()
}

// ============================================================================
// Intervals
// ============================================================================

#[test]
fn test_interval_rejects_empty() {
  assert_eq!(
    TimeInterval::new(5, 5),
    Err(InvalidInterval { start: 5, end: 5 })
  );
  assert!(TimeInterval::new(6, 5).is_err());
}

#[test]
fn test_point_and_open_ended() {
  let point = TimeInterval::point(7);
  assert_eq!((point.start(), point.end()), (7, 8));
  assert_eq!(point.duration(), 1);
  assert!(point.contains(7));
  assert!(!point.contains(8));

  let open = TimeInterval::open_ended(3);
  assert!(open.is_open_ended());
  assert_eq!(open.end(), INFINITY);
  assert_eq!(open.to_string(), "[3, inf)");
}

#[test]
fn test_overlap_is_half_open() {
  assert!(interval(0, 10).overlaps(&interval(9, 12)));
  assert!(!interval(0, 10).overlaps(&interval(10, 12)));
  assert_eq!(interval(0, 10).intersect(&interval(5, 15)), Some(interval(5, 10)));
  assert_eq!(interval(0, 5).intersect(&interval(5, 15)), None);
}

#[test]
fn test_difference_splits_in_start_order() {
  assert_eq!(interval(0, 10).difference(&interval(3, 6)), vec![interval(0, 3), interval(6, 10)]);
  assert_eq!(interval(0, 10).difference(&interval(5, 15)), vec![interval(0, 5)]);
  assert_eq!(interval(5, 15).difference(&interval(0, 10)), vec![interval(10, 15)]);
  assert!(interval(3, 6).difference(&interval(0, 10)).is_empty());
  assert_eq!(interval(0, 3).difference(&interval(5, 8)), vec![interval(0, 3)]);
}

#[test]
fn test_clip_start() {
  assert_eq!(interval(2, 8).clip_start(4), Some(interval(4, 8)));
  assert_eq!(interval(6, 8).clip_start(4), Some(interval(6, 8)));
  assert_eq!(interval(2, 4).clip_start(4), None);
}

// ============================================================================
// Temporal objects
// ============================================================================

#[test]
fn test_temporal_object_accessors() {
  let object = TemporalObject::valid("a", 3, 9).unwrap();
  assert_eq!(*object.payload(), "a");
  assert_eq!((object.start(), object.end()), (3, 9));
  assert_eq!(object.snapshots().count(), 6);
  assert_eq!(object.to_string(), "(a, [3, 9))");

  let mapped = object.clone().map(str::len);
  assert_eq!(*mapped.payload(), 1);
  assert_eq!(mapped.interval(), object.interval());

  let moved = object.with_interval(interval(4, 5));
  assert_eq!(moved.start(), 4);
  assert_eq!(moved.into_payload(), "a");
}

#[test]
fn test_predicates() {
  let a = TemporalObject::valid('x', 0, 10).unwrap();
  let b = TemporalObject::valid('x', 8, 12).unwrap();
  let c = TemporalObject::valid('y', 8, 12).unwrap();

  assert!(value_equivalent(&a, &b));
  assert!(!value_equivalent(&a, &c));
  assert!(interval_overlap(&a, &c));
  assert!(!interval_overlap(&a, &TemporalObject::point('x', 10)));

  assert!(ends_before(&a, &10));
  assert!(!ends_before(&a, &9));
  assert!(starts_at_or_before(&b, &8));
  assert!(!starts_at_or_before(&b, &7));

  assert_eq!(start_order(&a, &b), Ordering::Less);
  assert_eq!(start_order(&b, &c), Ordering::Equal);
}
