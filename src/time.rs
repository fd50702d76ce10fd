//! Validity intervals and the temporal objects that carry them.
//!
//! Every element that flows through a [`Graph`](crate::graph::Graph) is a
//! [`TemporalObject`]: a payload paired with a half-open validity interval
//! `[start, end)`. A point-in-time event is the degenerate interval
//! `[t, t + 1)`; an element without a known end uses [`INFINITY`].
//!
//! ## Ordering contract
//!
//! Operators rely on one property of their inputs: on a single input, the
//! start timestamps of arriving elements never decrease. The start timestamp is
//! the element's *timestamp* for heartbeat and ordering purposes.
//!
//! ## Predicates
//!
//! The free functions at the bottom of this module ([`value_equivalent`],
//! [`interval_overlap`], [`ends_before`], [`starts_at_or_before`],
//! [`start_order`]) are the building blocks that temporal operators plug into
//! their sweep areas.

use crate::error::InvalidInterval;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A point in logical time. Timestamps are application defined (milliseconds,
/// sequence numbers, ...) but must be totally ordered and non-negative.
pub type Timestamp = u64;

/// Sentinel for "unbounded": the end of an open interval, and the latest
/// timestamp of an input that has signaled completion.
pub const INFINITY: Timestamp = Timestamp::MAX;

/// Marker trait for values carried through a graph.
///
/// Blanket-implemented for every type that is cloneable, comparable for
/// equality, debuggable and thread-safe.
pub trait Payload: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// A half-open validity interval `[start, end)`.
///
/// The constructor rejects empty intervals (`end <= start`).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
  start: Timestamp,
  end: Timestamp,
}

impl TimeInterval {
  /// Creates the interval `[start, end)`.
  ///
  /// # Errors
  ///
  /// Returns [`InvalidInterval`] when `end <= start`.
  pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, InvalidInterval> {
    if end <= start {
      return Err(InvalidInterval { start, end });
    }
    Ok(Self { start, end })
  }

  /// Creates the point interval `[t, t + 1)`.
  ///
  /// `t` must be below [`INFINITY`]; the end saturates otherwise.
  pub fn point(t: Timestamp) -> Self {
    debug_assert!(t < INFINITY, "point interval at INFINITY");
    Self {
      start: t.min(INFINITY - 1),
      end: t.saturating_add(1),
    }
  }

  /// Creates the open interval `[start, INFINITY)`.
  pub fn open_ended(start: Timestamp) -> Self {
    Self {
      start: start.min(INFINITY - 1),
      end: INFINITY,
    }
  }

  /// Start (inclusive).
  #[inline]
  pub const fn start(&self) -> Timestamp {
    self.start
  }

  /// End (exclusive).
  #[inline]
  pub const fn end(&self) -> Timestamp {
    self.end
  }

  /// Returns true if the interval has no finite end.
  #[inline]
  pub const fn is_open_ended(&self) -> bool {
    self.end == INFINITY
  }

  /// Number of time instants covered by the interval.
  #[inline]
  pub const fn duration(&self) -> u64 {
    self.end - self.start
  }

  /// Returns true if `t` lies within `[start, end)`.
  #[inline]
  pub const fn contains(&self, t: Timestamp) -> bool {
    self.start <= t && t < self.end
  }

  /// Returns true if both intervals share at least one instant.
  #[inline]
  pub const fn overlaps(&self, other: &TimeInterval) -> bool {
    self.start < other.end && other.start < self.end
  }

  /// Returns the common part of both intervals, if any.
  pub fn intersect(&self, other: &TimeInterval) -> Option<TimeInterval> {
    let start = self.start.max(other.start);
    let end = self.end.min(other.end);
    (start < end).then_some(TimeInterval { start, end })
  }

  /// Returns the parts of `self` not covered by `other`.
  ///
  /// The result holds zero, one or two intervals, ordered by start.
  pub fn difference(&self, other: &TimeInterval) -> Vec<TimeInterval> {
    if !self.overlaps(other) {
      return vec![*self];
    }
    let mut parts = Vec::with_capacity(2);
    if self.start < other.start {
      parts.push(TimeInterval {
        start: self.start,
        end: other.start,
      });
    }
    if other.end < self.end {
      parts.push(TimeInterval {
        start: other.end,
        end: self.end,
      });
    }
    parts
  }

  /// Returns this interval with its start raised to at least `start`.
  ///
  /// Returns `None` if nothing of the interval remains.
  pub fn clip_start(&self, start: Timestamp) -> Option<TimeInterval> {
    let start = self.start.max(start);
    (start < self.end).then_some(TimeInterval {
      start,
      end: self.end,
    })
  }
}

impl fmt::Display for TimeInterval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_open_ended() {
      write!(f, "[{}, inf)", self.start)
    } else {
      write!(f, "[{}, {})", self.start, self.end)
    }
  }
}

/// A payload paired with its validity interval.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct TemporalObject<P> {
  payload: P,
  interval: TimeInterval,
}

impl<P> TemporalObject<P> {
  /// Creates a temporal object valid during `interval`.
  pub const fn new(payload: P, interval: TimeInterval) -> Self {
    Self { payload, interval }
  }

  /// Creates a point-in-time object valid at `t` only.
  pub fn point(payload: P, t: Timestamp) -> Self {
    Self::new(payload, TimeInterval::point(t))
  }

  /// Creates an object valid on `[start, end)`.
  ///
  /// # Errors
  ///
  /// Returns [`InvalidInterval`] when `end <= start`.
  pub fn valid(payload: P, start: Timestamp, end: Timestamp) -> Result<Self, InvalidInterval> {
    Ok(Self::new(payload, TimeInterval::new(start, end)?))
  }

  /// The payload.
  #[inline]
  pub const fn payload(&self) -> &P {
    &self.payload
  }

  /// Consumes the object and returns its payload.
  #[inline]
  pub fn into_payload(self) -> P {
    self.payload
  }

  /// The validity interval.
  #[inline]
  pub const fn interval(&self) -> &TimeInterval {
    &self.interval
  }

  /// Start timestamp; this is the element's timestamp for ordering.
  #[inline]
  pub const fn start(&self) -> Timestamp {
    self.interval.start
  }

  /// End timestamp (exclusive).
  #[inline]
  pub const fn end(&self) -> Timestamp {
    self.interval.end
  }

  /// Returns the same payload with a different interval.
  pub fn with_interval(self, interval: TimeInterval) -> Self {
    Self {
      payload: self.payload,
      interval,
    }
  }

  /// Transforms the payload, keeping the interval.
  pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> TemporalObject<Q> {
    TemporalObject {
      payload: f(self.payload),
      interval: self.interval,
    }
  }

  /// Returns every instant at which the object is valid.
  ///
  /// Only meaningful for bounded intervals; open intervals yield an
  /// effectively endless range.
  pub fn snapshots(&self) -> std::ops::Range<Timestamp> {
    self.interval.start..self.interval.end
  }
}

impl<P: fmt::Display> fmt::Display for TemporalObject<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.payload, self.interval)
  }
}

/// Payload equality, ignoring intervals.
pub fn value_equivalent<P: PartialEq>(a: &TemporalObject<P>, b: &TemporalObject<P>) -> bool {
  a.payload == b.payload
}

/// Interval overlap, ignoring payloads.
pub fn interval_overlap<P>(a: &TemporalObject<P>, b: &TemporalObject<P>) -> bool {
  a.interval.overlaps(&b.interval)
}

/// Remove predicate: the stored object's validity ended at or before `bound`,
/// so no element starting at `bound` or later can overlap it.
pub fn ends_before<P>(stored: &TemporalObject<P>, bound: &Timestamp) -> bool {
  stored.end() <= *bound
}

/// Remove predicate for ordered release: the stored object starts at or
/// before `bound`.
pub fn starts_at_or_before<P>(stored: &TemporalObject<P>, bound: &Timestamp) -> bool {
  stored.start() <= *bound
}

/// Orders temporal objects by start timestamp.
pub fn start_order<P>(a: &TemporalObject<P>, b: &TemporalObject<P>) -> Ordering {
  a.start().cmp(&b.start())
}
