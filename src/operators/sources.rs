//! Sources feeding a graph from iterators.

use crate::error::NodeError;
use crate::graph::Context;
use crate::heartbeat::{Always, HeartbeatPredicate, HeartbeatState};
use crate::metadata::{BASE_METADATA, NodeMetrics, OperatorDescriptor};
use crate::metrics;
use crate::node::{HeartbeatCapable, HeartbeatOrigin, Node, NodeId, Source, SourceStep};
use crate::record::{Tuple, TupleCursor};
use crate::time::{INFINITY, Payload, TemporalObject, Timestamp};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::iter::Peekable;
use tracing::{debug, trace, warn};

static CURSOR: OperatorDescriptor = OperatorDescriptor::new("cursor-source", BASE_METADATA);

type Cursor<P> = Peekable<Box<dyn Iterator<Item = TemporalObject<P>> + Send>>;

struct CursorState<P: Payload> {
  cursor: Cursor<P>,
  opened: bool,
  closed: bool,
  exhausted: bool,
  heartbeats_active: bool,
  last_heartbeat: Option<Timestamp>,
  predicate: Box<dyn HeartbeatPredicate>,
}

impl<P: Payload> CursorState<P> {
  /// Lower bound on the next element's start.
  fn next_start(&mut self) -> Timestamp {
    self.cursor.peek().map_or(INFINITY, TemporalObject::start)
  }

  fn heartbeat_due(&mut self, value: Timestamp) -> bool {
    if !self.heartbeats_active || value == INFINITY {
      return false;
    }
    if self.last_heartbeat.is_some_and(|last| value <= last) {
      return false;
    }
    let latest = [Some(value)];
    self.predicate.should_emit(&HeartbeatState {
      latest: &latest,
      min_timestamp: value,
      last_heartbeat: self.last_heartbeat,
    })
  }
}

/// Source emitting the elements of an iterator, one per step.
///
/// Starts must be non-decreasing. With heartbeats active, every emitted
/// element is followed by a heartbeat carrying the next element's start, and
/// heartbeats injected by a generator are forwarded capped at that start.
pub struct CursorSource<P: Payload> {
  name: String,
  state: Mutex<CursorState<P>>,
  metrics: NodeMetrics,
}

impl<P: Payload> CursorSource<P> {
  /// Creates a source over `elements`.
  pub fn new<I>(name: impl Into<String>, elements: I) -> Self
  where
    I: IntoIterator<Item = TemporalObject<P>>,
    I::IntoIter: Send + 'static,
  {
    let cursor: Box<dyn Iterator<Item = TemporalObject<P>> + Send> = Box::new(elements.into_iter());
    Self {
      name: name.into(),
      state: Mutex::new(CursorState {
        cursor: cursor.peekable(),
        opened: false,
        closed: false,
        exhausted: false,
        heartbeats_active: false,
        last_heartbeat: None,
        predicate: Box::new(Always),
      }),
      metrics: NodeMetrics::new(),
    }
  }

  /// Creates a source over a vector.
  pub fn from_vec(name: impl Into<String>, elements: Vec<TemporalObject<P>>) -> Self {
    Self::new(name, elements)
  }

  /// Creates a source of `count` point objects with seeded random gaps of at
  /// most `max_gap` between consecutive starts. `make` builds the payload of
  /// the `n`-th element.
  pub fn random(
    name: impl Into<String>,
    seed: u64,
    count: usize,
    max_gap: Timestamp,
    mut make: impl FnMut(&mut StdRng, usize) -> P + Send + 'static,
  ) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut now: Timestamp = 0;
    let elements = (0..count).map(move |index| {
      now = now.saturating_add(rng.gen_range(0..=max_gap));
      let payload = make(&mut rng, index);
      TemporalObject::point(payload, now)
    });
    Self::new(name, elements)
  }

  /// Sets whether heartbeats are emitted and forwarded.
  pub fn with_heartbeats(self, active: bool) -> Self {
    self.state.lock().heartbeats_active = active;
    self
  }

  /// Returns true once the iterator ran dry.
  pub fn is_exhausted(&self) -> bool {
    self.state.lock().exhausted
  }
}

impl CursorSource<Tuple> {
  /// Creates a source over a tuple cursor, reading validity from integer
  /// columns. Without `end_column` every tuple is a point object. Rows whose
  /// timestamps are missing or invalid are skipped.
  pub fn from_tuple_cursor(
    name: impl Into<String>,
    cursor: TupleCursor,
    start_column: usize,
    end_column: Option<usize>,
  ) -> Self {
    let elements = cursor.filter_map(move |tuple| {
      let start = tuple.timestamp(start_column)?;
      let element = match end_column {
        Some(column) => {
          let end = tuple.timestamp(column)?;
          TemporalObject::valid(tuple, start, end).ok()
        }
        None => Some(TemporalObject::point(tuple, start)),
      };
      if element.is_none() {
        warn!(start, "skipping tuple with an empty validity interval");
      }
      element
    });
    Self::new(name, elements)
  }
}

impl<P: Payload> Node<P> for CursorSource<P> {
  fn name(&self) -> &str {
    &self.name
  }

  fn descriptor(&self) -> &'static OperatorDescriptor {
    &CURSOR
  }

  fn metrics(&self) -> &NodeMetrics {
    &self.metrics
  }

  fn open(&self, node: NodeId) -> Result<(), NodeError> {
    let mut state = self.state.lock();
    if state.closed {
      return Err(NodeError::Closed(node));
    }
    state.opened = true;
    Ok(())
  }

  fn close(&self) {
    let mut state = self.state.lock();
    if !state.closed {
      state.closed = true;
      debug!(name = %self.name, "source closed");
    }
  }

  fn is_open(&self) -> bool {
    let state = self.state.lock();
    state.opened && !state.closed
  }

  fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  fn as_source(&self) -> Option<&dyn Source<P>> {
    Some(self)
  }

  fn as_heartbeat(&self) -> Option<&dyn HeartbeatCapable<P>> {
    Some(self)
  }
}

impl<P: Payload> Source<P> for CursorSource<P> {
  fn is_steppable(&self) -> bool {
    true
  }

  fn step(&self, ctx: &Context<'_, P>) -> Result<SourceStep, NodeError> {
    let node = ctx.node_id();
    let mut state = self.state.lock();
    if state.closed {
      return Err(NodeError::Closed(node));
    }
    if !state.opened {
      return Err(NodeError::NotOpen(node));
    }
    if state.exhausted {
      return Ok(SourceStep::Exhausted);
    }
    let Some(element) = state.cursor.next() else {
      state.exhausted = true;
      debug!(graph = %ctx.graph().name(), node = %node, name = %self.name, "source exhausted");
      ctx.signal_done();
      return Ok(SourceStep::Exhausted);
    };
    self.metrics.record_in();
    metrics::record_items_in(ctx.graph().name(), node, 1);
    ctx.transfer(element);
    let next = state.next_start();
    if state.heartbeat_due(next) {
      state.last_heartbeat = Some(next);
      ctx.transfer_heartbeat(next);
    }
    Ok(SourceStep::Emitted)
  }
}

impl<P: Payload> HeartbeatCapable<P> for CursorSource<P> {
  fn heartbeat(
    &self,
    ctx: &Context<'_, P>,
    timestamp: Timestamp,
    _origin: HeartbeatOrigin,
  ) -> Result<(), NodeError> {
    let mut state = self.state.lock();
    if state.closed {
      return Err(NodeError::Closed(ctx.node_id()));
    }
    if !state.opened || state.exhausted {
      return Ok(());
    }
    self.metrics.record_heartbeat_in();
    let value = timestamp.min(state.next_start());
    if state.heartbeat_due(value) {
      trace!("CursorSource::heartbeat(node={}, value={})", ctx.node_id(), value);
      state.last_heartbeat = Some(value);
      ctx.transfer_heartbeat(value);
    }
    Ok(())
  }

  fn set_heartbeats_active(&self, active: bool) {
    self.state.lock().heartbeats_active = active;
  }

  fn heartbeats_active(&self) -> bool {
    self.state.lock().heartbeats_active
  }

  fn set_heartbeat_predicate(&self, predicate: Box<dyn HeartbeatPredicate>) {
    self.state.lock().predicate = predicate;
  }

  fn min_timestamp(&self) -> Option<Timestamp> {
    let mut state = self.state.lock();
    if state.exhausted {
      return Some(INFINITY);
    }
    Some(state.next_start())
  }

  fn last_heartbeat(&self) -> Option<Timestamp> {
    self.state.lock().last_heartbeat
  }
}
