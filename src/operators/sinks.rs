//! Terminal sinks.

use crate::error::NodeError;
use crate::graph::Context;
use crate::heartbeat::HeartbeatPredicate;
use crate::metadata::{BASE_METADATA, NodeMetrics, OperatorDescriptor};
use crate::metrics;
use crate::node::{HeartbeatCapable, HeartbeatOrigin, InputId, Node, NodeId, Sink};
use crate::time::{Payload, TemporalObject, Timestamp};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info};

static COLLECT: OperatorDescriptor = OperatorDescriptor::new("collect-sink", BASE_METADATA);
static LOGGING: OperatorDescriptor = OperatorDescriptor::new("logging-sink", BASE_METADATA);

/// Lifecycle and per-input done flags shared by the sinks in this module.
#[derive(Debug, Default)]
struct SinkLifecycle {
  inputs: BTreeMap<InputId, bool>,
  opened: bool,
  closed: bool,
  done: bool,
}

impl SinkLifecycle {
  fn ensure_accepting(&self, node: NodeId, input: InputId) -> Result<(), NodeError> {
    if self.closed {
      return Err(NodeError::Closed(node));
    }
    if !self.inputs.contains_key(&input) {
      return Err(NodeError::UnknownInput { node, input });
    }
    Ok(())
  }

  /// Marks `input` done; returns true when this completes the sink.
  fn mark_done(&mut self, node: NodeId, input: InputId) -> Result<bool, NodeError> {
    if self.closed || self.done {
      return Ok(false);
    }
    let flag = self
      .inputs
      .get_mut(&input)
      .ok_or(NodeError::UnknownInput { node, input })?;
    *flag = true;
    self.done = self.inputs.values().all(|done| *done);
    Ok(self.done)
  }
}

struct Collected<P> {
  lifecycle: SinkLifecycle,
  elements: Vec<TemporalObject<P>>,
  heartbeats: Vec<Timestamp>,
}

/// Sink recording everything it receives, for tests and embedding.
pub struct CollectSink<P: Payload> {
  name: String,
  state: Mutex<Collected<P>>,
  metrics: NodeMetrics,
}

impl<P: Payload> CollectSink<P> {
  /// Creates an empty sink.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      state: Mutex::new(Collected {
        lifecycle: SinkLifecycle::default(),
        elements: Vec::new(),
        heartbeats: Vec::new(),
      }),
      metrics: NodeMetrics::new(),
    }
  }

  /// Elements received so far, in arrival order.
  pub fn elements(&self) -> Vec<TemporalObject<P>> {
    self.state.lock().elements.clone()
  }

  /// Payloads received so far, in arrival order.
  pub fn payloads(&self) -> Vec<P> {
    self
      .state
      .lock()
      .elements
      .iter()
      .map(|element| element.payload().clone())
      .collect()
  }

  /// Heartbeat values received so far.
  pub fn heartbeats(&self) -> Vec<Timestamp> {
    self.state.lock().heartbeats.clone()
  }

  /// Removes and returns the received elements.
  pub fn take(&self) -> Vec<TemporalObject<P>> {
    std::mem::take(&mut self.state.lock().elements)
  }
}

impl<P: Payload> Node<P> for CollectSink<P> {
  fn name(&self) -> &str {
    &self.name
  }

  fn descriptor(&self) -> &'static OperatorDescriptor {
    &COLLECT
  }

  fn metrics(&self) -> &NodeMetrics {
    &self.metrics
  }

  fn open(&self, node: NodeId) -> Result<(), NodeError> {
    let mut state = self.state.lock();
    if state.lifecycle.closed {
      return Err(NodeError::Closed(node));
    }
    state.lifecycle.opened = true;
    Ok(())
  }

  fn close(&self) {
    self.state.lock().lifecycle.closed = true;
  }

  fn is_open(&self) -> bool {
    let state = self.state.lock();
    state.lifecycle.opened && !state.lifecycle.closed
  }

  fn is_closed(&self) -> bool {
    self.state.lock().lifecycle.closed
  }

  fn as_sink(&self) -> Option<&dyn Sink<P>> {
    Some(self)
  }

  fn as_heartbeat(&self) -> Option<&dyn HeartbeatCapable<P>> {
    Some(self)
  }
}

impl<P: Payload> Sink<P> for CollectSink<P> {
  fn process(
    &self,
    ctx: &Context<'_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    let mut state = self.state.lock();
    state.lifecycle.ensure_accepting(ctx.node_id(), input)?;
    self.metrics.record_in();
    metrics::record_items_in(ctx.graph().name(), ctx.node_id(), 1);
    state.elements.push(element);
    Ok(())
  }

  fn done(&self, ctx: &Context<'_, P>, input: InputId) -> Result<(), NodeError> {
    if self.state.lock().lifecycle.mark_done(ctx.node_id(), input)? {
      debug!(graph = %ctx.graph().name(), node = %ctx.node_id(), name = %self.name, "sink done");
    }
    Ok(())
  }

  fn is_done(&self) -> bool {
    self.state.lock().lifecycle.done
  }

  fn received_done(&self, input: InputId) -> bool {
    self
      .state
      .lock()
      .lifecycle
      .inputs
      .get(&input)
      .copied()
      .unwrap_or(false)
  }

  fn add_input(&self, input: InputId) -> bool {
    let mut state = self.state.lock();
    if state.lifecycle.closed || state.lifecycle.inputs.contains_key(&input) {
      return false;
    }
    state.lifecycle.inputs.insert(input, false);
    true
  }

  fn remove_input(&self, input: InputId) {
    self.state.lock().lifecycle.inputs.remove(&input);
  }
}

impl<P: Payload> HeartbeatCapable<P> for CollectSink<P> {
  fn heartbeat(
    &self,
    ctx: &Context<'_, P>,
    timestamp: Timestamp,
    _origin: HeartbeatOrigin,
  ) -> Result<(), NodeError> {
    let mut state = self.state.lock();
    if state.lifecycle.closed {
      return Err(NodeError::Closed(ctx.node_id()));
    }
    self.metrics.record_heartbeat_in();
    state.heartbeats.push(timestamp);
    Ok(())
  }

  fn set_heartbeats_active(&self, _active: bool) {}

  fn heartbeats_active(&self) -> bool {
    true
  }

  fn set_heartbeat_predicate(&self, _predicate: Box<dyn HeartbeatPredicate>) {}

  fn min_timestamp(&self) -> Option<Timestamp> {
    let state = self.state.lock();
    let latest = state.elements.last().map(TemporalObject::start);
    match (latest, state.heartbeats.iter().max().copied()) {
      (Some(a), Some(b)) => Some(a.max(b)),
      (a, b) => a.or(b),
    }
  }

  fn last_heartbeat(&self) -> Option<Timestamp> {
    self.state.lock().heartbeats.iter().max().copied()
  }
}

/// Sink writing every element to the `tracing` log at info level.
pub struct LoggingSink {
  name: String,
  lifecycle: Mutex<SinkLifecycle>,
  metrics: NodeMetrics,
}

impl LoggingSink {
  /// Creates the sink.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      lifecycle: Mutex::new(SinkLifecycle::default()),
      metrics: NodeMetrics::new(),
    }
  }
}

impl<P: Payload> Node<P> for LoggingSink {
  fn name(&self) -> &str {
    &self.name
  }

  fn descriptor(&self) -> &'static OperatorDescriptor {
    &LOGGING
  }

  fn metrics(&self) -> &NodeMetrics {
    &self.metrics
  }

  fn open(&self, node: NodeId) -> Result<(), NodeError> {
    let mut lifecycle = self.lifecycle.lock();
    if lifecycle.closed {
      return Err(NodeError::Closed(node));
    }
    lifecycle.opened = true;
    Ok(())
  }

  fn close(&self) {
    self.lifecycle.lock().closed = true;
  }

  fn is_open(&self) -> bool {
    let lifecycle = self.lifecycle.lock();
    lifecycle.opened && !lifecycle.closed
  }

  fn is_closed(&self) -> bool {
    self.lifecycle.lock().closed
  }

  fn as_sink(&self) -> Option<&dyn Sink<P>> {
    Some(self)
  }
}

impl<P: Payload> Sink<P> for LoggingSink {
  fn process(
    &self,
    ctx: &Context<'_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    self.lifecycle.lock().ensure_accepting(ctx.node_id(), input)?;
    self.metrics.record_in();
    info!(sink = %self.name, input, start = element.start(), end = element.end(), payload = ?element.payload(), "element");
    Ok(())
  }

  fn done(&self, ctx: &Context<'_, P>, input: InputId) -> Result<(), NodeError> {
    if self.lifecycle.lock().mark_done(ctx.node_id(), input)? {
      info!(sink = %self.name, "done");
    }
    Ok(())
  }

  fn is_done(&self) -> bool {
    self.lifecycle.lock().done
  }

  fn received_done(&self, input: InputId) -> bool {
    self.lifecycle.lock().inputs.get(&input).copied().unwrap_or(false)
  }

  fn add_input(&self, input: InputId) -> bool {
    let mut lifecycle = self.lifecycle.lock();
    if lifecycle.closed || lifecycle.inputs.contains_key(&input) {
      return false;
    }
    lifecycle.inputs.insert(input, false);
    true
  }

  fn remove_input(&self, input: InputId) {
    self.lifecycle.lock().inputs.remove(&input);
  }
}
