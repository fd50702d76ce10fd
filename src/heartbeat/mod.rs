//! # Heartbeats
//!
//! A heartbeat (punctuation) on an input asserts that no future element on
//! that input starts earlier than the heartbeat value. Temporal operators
//! derive their minimum timestamp from these bounds and forward it downstream
//! once it advances.
//!
//! This module holds the pieces around that mechanism:
//!
//! - [`HeartbeatPredicate`] rate-limits outgoing heartbeats. Policies:
//!   [`Always`], [`EveryNth`], [`EveryMillis`], [`MinLastHbDifference`],
//!   [`MinTimestampSource`] and [`EpsilonMinTimestampSource`]. Any
//!   `FnMut(&HeartbeatState) -> bool` closure works as well.
//! - [`HeartbeatFunction`] produces heartbeat values for the
//!   [`HeartbeatGenerator`]: [`system_time`], [`from_iter`], [`counter`] and
//!   [`node_min_timestamp`].
//! - [`HeartbeatGenerator`] multiplexes many logical timers onto one wake loop.
//! - [`OrderingVerifier`] checks the ordering contract at a sink.

mod generator;
mod verify;

pub use generator::{GeneratorHandle, HeartbeatGenerator, RegistrationId};
pub use verify::{OrderingVerifier, verify_heartbeat_ordering};

use crate::graph::WeakGraph;
use crate::node::NodeId;
use crate::time::{Payload, Timestamp};
use std::fmt;
use std::time::{Duration, Instant};

/// What a predicate sees when a node is about to forward a heartbeat.
#[derive(Clone, Copy, Debug)]
pub struct HeartbeatState<'a> {
  /// Latest timestamp per input, ordered by input id. `None` while an input
  /// has not established a bound.
  pub latest: &'a [Option<Timestamp>],
  /// Candidate heartbeat value (the node's minimum timestamp).
  pub min_timestamp: Timestamp,
  /// Last value forwarded downstream.
  pub last_heartbeat: Option<Timestamp>,
}

/// Decides whether a heartbeat candidate is forwarded.
///
/// A rejected candidate is not lost: the next qualifying event produces a new
/// one with a value at least as large.
pub trait HeartbeatPredicate: Send {
  /// Returns true to forward the candidate.
  fn should_emit(&mut self, state: &HeartbeatState<'_>) -> bool;
}

impl<F> HeartbeatPredicate for F
where
  F: FnMut(&HeartbeatState<'_>) -> bool + Send,
{
  fn should_emit(&mut self, state: &HeartbeatState<'_>) -> bool {
    self(state)
  }
}

impl fmt::Debug for dyn HeartbeatPredicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("HeartbeatPredicate")
  }
}

/// Forwards every candidate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Always;

impl HeartbeatPredicate for Always {
  fn should_emit(&mut self, _state: &HeartbeatState<'_>) -> bool {
    true
  }
}

/// Forwards every `n`-th candidate.
#[derive(Clone, Debug)]
pub struct EveryNth {
  n: u64,
  seen: u64,
}

impl EveryNth {
  /// Creates the predicate; `n == 0` behaves like `n == 1`.
  pub fn new(n: u64) -> Self {
    Self { n: n.max(1), seen: 0 }
  }
}

impl HeartbeatPredicate for EveryNth {
  fn should_emit(&mut self, _state: &HeartbeatState<'_>) -> bool {
    self.seen += 1;
    if self.seen >= self.n {
      self.seen = 0;
      true
    } else {
      false
    }
  }
}

/// Forwards at most one candidate per wall-clock period.
#[derive(Clone, Debug)]
pub struct EveryMillis {
  period: Duration,
  last: Option<Instant>,
}

impl EveryMillis {
  /// Creates the predicate.
  pub fn new(millis: u64) -> Self {
    Self {
      period: Duration::from_millis(millis),
      last: None,
    }
  }
}

impl HeartbeatPredicate for EveryMillis {
  fn should_emit(&mut self, _state: &HeartbeatState<'_>) -> bool {
    let now = Instant::now();
    match self.last {
      Some(last) if now.duration_since(last) < self.period => false,
      _ => {
        self.last = Some(now);
        true
      }
    }
  }
}

/// Forwards only if the candidate exceeds the last heartbeat by more than a
/// threshold. The first candidate always passes.
#[derive(Clone, Copy, Debug)]
pub struct MinLastHbDifference(pub Timestamp);

impl HeartbeatPredicate for MinLastHbDifference {
  fn should_emit(&mut self, state: &HeartbeatState<'_>) -> bool {
    match state.last_heartbeat {
      Some(last) => state.min_timestamp.saturating_sub(last) > self.0,
      None => true,
    }
  }
}

/// Forwards only if the input at position `pos` currently holds the minimum.
#[derive(Clone, Copy, Debug)]
pub struct MinTimestampSource(pub usize);

impl HeartbeatPredicate for MinTimestampSource {
  fn should_emit(&mut self, state: &HeartbeatState<'_>) -> bool {
    state.latest.get(self.0).copied().flatten() == Some(state.min_timestamp)
  }
}

/// Like [`MinTimestampSource`], but accepts an input within `epsilon` of the
/// minimum.
#[derive(Clone, Copy, Debug)]
pub struct EpsilonMinTimestampSource {
  /// Input position.
  pub pos: usize,
  /// Tolerance above the minimum.
  pub epsilon: Timestamp,
}

impl HeartbeatPredicate for EpsilonMinTimestampSource {
  fn should_emit(&mut self, state: &HeartbeatState<'_>) -> bool {
    state
      .latest
      .get(self.pos)
      .copied()
      .flatten()
      .is_some_and(|latest| latest <= state.min_timestamp.saturating_add(self.epsilon))
  }
}

/// Produces heartbeat values for a generator registration. `None` means no
/// heartbeat is available any more and unregisters the target.
pub trait HeartbeatFunction: Send {
  /// Computes the next value.
  fn next_heartbeat(&mut self) -> Option<Timestamp>;
}

impl<F> HeartbeatFunction for F
where
  F: FnMut() -> Option<Timestamp> + Send,
{
  fn next_heartbeat(&mut self) -> Option<Timestamp> {
    self()
  }
}

/// Wall-clock milliseconds since the Unix epoch, minus `delta`.
pub fn system_time(delta: u64) -> impl HeartbeatFunction {
  move || {
    let now = chrono::Utc::now().timestamp_millis();
    Some(u64::try_from(now).unwrap_or(0).saturating_sub(delta))
  }
}

/// Yields the values of `iter`, then stops.
pub fn from_iter<I>(iter: I) -> impl HeartbeatFunction
where
  I: IntoIterator<Item = Timestamp>,
  I::IntoIter: Send,
{
  let mut iter = iter.into_iter();
  move || iter.next()
}

/// Yields `0, 1, ..., limit - 1`, then stops.
pub fn counter(limit: Timestamp) -> impl HeartbeatFunction {
  from_iter(0..limit)
}

/// Yields the current minimum timestamp of `node`, as long as the graph and
/// the node are alive and the node has one.
pub fn node_min_timestamp<P: Payload>(graph: WeakGraph<P>, node: NodeId) -> impl HeartbeatFunction {
  move || graph.upgrade()?.min_timestamp(node)
}
