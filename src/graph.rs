//! # Graph
//!
//! The [`Graph`] owns every node of a continuous query and the topology that
//! wires them together. Nodes live in an arena and are addressed by stable
//! [`NodeId`]s; edges are `(source, sink, input)` triples where `input` is the
//! slot id on the sink.
//!
//! ## Locking
//!
//! The topology sits behind a single reader/writer lock:
//!
//! - **Structural changes** (`connect`, `disconnect`, `close`, node removal and
//!   migration rewiring) take the write lock for their full duration.
//! - **Delivery** (`process`, `done`, `heartbeat`, source steps) takes the read
//!   lock once at the entry point and hands a [`Context`] borrowing the guard
//!   down the synchronous cascade. Nested deliveries never re-acquire it.
//!
//! A structural change therefore waits for in-flight deliveries to drain, and
//! no element is ever delivered to a slot that is unbound at delivery time.
//! Because the read lock is always taken before any node-level mutex, a writer
//! can never hold the topology while a node waits for it.
//!
//! ## Example
//!
//! ```rust
//! use timeweave::graph::Graph;
//! use timeweave::node::Sink;
//! use timeweave::operators::{CollectSink, CursorSource};
//! use timeweave::time::TemporalObject;
//! use std::sync::Arc;
//!
//! let graph: Graph<i64> = Graph::new("example");
//! let source = graph.add_node(CursorSource::from_vec(
//!   "numbers",
//!   vec![TemporalObject::point(1_i64, 0), TemporalObject::point(2, 1)],
//! ));
//! let sink = Arc::new(CollectSink::<i64>::new("out"));
//! let sink_id = graph.add_shared_node(sink.clone());
//! graph.connect(source, sink_id, 0)?;
//! graph.open_all()?;
//! graph.drain_source(source)?;
//! assert_eq!(sink.elements().len(), 2);
//! assert!(sink.is_done());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{GraphError, NodeError, OrderingViolation};
use crate::heartbeat::HeartbeatPredicate;
use crate::metadata::MetaDataSnapshot;
use crate::metrics;
use crate::node::{HeartbeatOrigin, InputId, Node, NodeId, SourceStep};
use crate::time::{Payload, TemporalObject, Timestamp};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// One outgoing edge: the downstream node and the input slot it is bound to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Subscription {
  /// Downstream node.
  pub sink: NodeId,
  /// Input slot on the downstream node.
  pub input: InputId,
}

struct NodeEntry<P: Payload> {
  node: Arc<dyn Node<P>>,
  inputs: BTreeMap<InputId, NodeId>,
  outputs: Vec<Subscription>,
}

/// Node arena and edge sets. Readable through a [`Context`] or
/// [`Graph::with_topology`]; mutated only under the graph's write lock.
pub struct Topology<P: Payload> {
  slots: Vec<Option<NodeEntry<P>>>,
  live: usize,
}

impl<P: Payload> Topology<P> {
  fn new() -> Self {
    Self {
      slots: Vec::new(),
      live: 0,
    }
  }

  fn entry(&self, id: NodeId) -> Result<&NodeEntry<P>, GraphError> {
    self
      .slots
      .get(id.0)
      .and_then(Option::as_ref)
      .ok_or(GraphError::UnknownNode(id))
  }

  fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry<P>, GraphError> {
    self
      .slots
      .get_mut(id.0)
      .and_then(Option::as_mut)
      .ok_or(GraphError::UnknownNode(id))
  }

  /// Returns the node stored under `id`.
  pub fn node(&self, id: NodeId) -> Option<&Arc<dyn Node<P>>> {
    self.entry(id).ok().map(|entry| &entry.node)
  }

  /// Returns true if `id` names a live node.
  pub fn contains(&self, id: NodeId) -> bool {
    self.entry(id).is_ok()
  }

  /// Number of live nodes.
  pub fn len(&self) -> usize {
    self.live
  }

  /// Returns true if the topology holds no nodes.
  pub fn is_empty(&self) -> bool {
    self.live == 0
  }

  /// Ids of all live nodes, in insertion order.
  pub fn node_ids(&self) -> Vec<NodeId> {
    self
      .slots
      .iter()
      .enumerate()
      .filter(|(_, slot)| slot.is_some())
      .map(|(index, _)| NodeId(index))
      .collect()
  }

  /// Outgoing edges of `id`; empty for unknown nodes.
  pub fn subscriptions(&self, id: NodeId) -> &[Subscription] {
    self
      .entry(id)
      .map(|entry| entry.outputs.as_slice())
      .unwrap_or(&[])
  }

  /// Bound inputs of `id` as `(input, source)` pairs, ordered by input id.
  pub fn inputs(&self, id: NodeId) -> Vec<(InputId, NodeId)> {
    self
      .entry(id)
      .map(|entry| entry.inputs.iter().map(|(input, source)| (*input, *source)).collect())
      .unwrap_or_default()
  }

  /// Source currently bound to `input` of `sink`.
  pub fn source_of(&self, sink: NodeId, input: InputId) -> Option<NodeId> {
    self.entry(sink).ok()?.inputs.get(&input).copied()
  }

  /// Input slot of `sink` that `source` is bound to, if any.
  pub fn subscription_between(&self, source: NodeId, sink: NodeId) -> Option<InputId> {
    self
      .subscriptions(source)
      .iter()
      .find(|subscription| subscription.sink == sink)
      .map(|subscription| subscription.input)
  }

  /// Breadth-first walk along outgoing edges, starting nodes included.
  pub fn downstream(&self, starts: &[NodeId]) -> Vec<NodeId> {
    self.walk(starts, |id| self.subscriptions(id).iter().map(|s| s.sink).collect())
  }

  /// Breadth-first walk along incoming edges, starting nodes included.
  pub fn upstream(&self, starts: &[NodeId]) -> Vec<NodeId> {
    self.walk(starts, |id| self.inputs(id).into_iter().map(|(_, source)| source).collect())
  }

  fn walk(&self, starts: &[NodeId], next: impl Fn(NodeId) -> Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<NodeId> = starts.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
      if !self.contains(id) || !seen.insert(id) {
        continue;
      }
      order.push(id);
      queue.extend(next(id));
    }
    order
  }

  pub(crate) fn insert(&mut self, node: Arc<dyn Node<P>>) -> NodeId {
    let id = NodeId(self.slots.len());
    self.slots.push(Some(NodeEntry {
      node,
      inputs: BTreeMap::new(),
      outputs: Vec::new(),
    }));
    self.live += 1;
    id
  }

  pub(crate) fn connect(
    &mut self,
    source: NodeId,
    sink: NodeId,
    input: InputId,
    honor_refusal: bool,
  ) -> Result<(), GraphError> {
    let source_node = self.entry(source)?.node.clone();
    let sink_entry = self.entry(sink)?;
    let sink_node = sink_entry.node.clone();
    let source_view = source_node.as_source().ok_or(GraphError::NotASource(source))?;
    let sink_view = sink_node.as_sink().ok_or(GraphError::NotASink(sink))?;
    if source == sink {
      return Err(GraphError::InputRejected { sink, input });
    }
    if source_node.is_closed() {
      return Err(GraphError::NodeClosed(source));
    }
    if sink_node.is_closed() {
      return Err(GraphError::NodeClosed(sink));
    }
    if let Some(bound) = sink_entry.inputs.get(&input) {
      return Err(if *bound == source {
        GraphError::DuplicateSubscription {
          source_node: source,
          sink,
          input,
        }
      } else {
        GraphError::SlotOccupied {
          sink,
          input,
          bound: *bound,
        }
      });
    }
    if self.downstream(&[sink]).contains(&source) {
      return Err(GraphError::Cycle {
        source_node: source,
        sink,
      });
    }
    if honor_refusal && !source_view.accepts_subscriptions() {
      return Err(GraphError::SubscriptionRefused(source));
    }
    if !sink_view.add_input(input) {
      return Err(GraphError::InputRejected { sink, input });
    }
    self.entry_mut(sink)?.inputs.insert(input, source);
    self.entry_mut(source)?.outputs.push(Subscription { sink, input });
    Ok(())
  }

  pub(crate) fn disconnect(
    &mut self,
    source: NodeId,
    sink: NodeId,
    input: InputId,
  ) -> Result<(), GraphError> {
    let sink_entry = self.entry(sink)?;
    if sink_entry.inputs.get(&input) != Some(&source) || !self.contains(source) {
      return Err(GraphError::NoSuchEdge {
        source_node: source,
        sink,
        input,
      });
    }
    if let Some(view) = sink_entry.node.as_sink() {
      view.remove_input(input);
    }
    self.entry_mut(sink)?.inputs.remove(&input);
    self
      .entry_mut(source)?
      .outputs
      .retain(|subscription| !(subscription.sink == sink && subscription.input == input));
    Ok(())
  }

  /// Moves `input` of `sink` over to `new_source` without notifying the sink,
  /// so its per-input state (latest timestamp, done flag) carries over.
  /// Returns the previously bound source.
  pub(crate) fn rebind(
    &mut self,
    sink: NodeId,
    input: InputId,
    new_source: NodeId,
  ) -> Result<NodeId, GraphError> {
    let previous = self
      .source_of(sink, input)
      .ok_or(GraphError::NoSuchEdge {
        source_node: new_source,
        sink,
        input,
      })?;
    if previous == new_source {
      return Ok(previous);
    }
    let new_node = self.entry(new_source)?.node.clone();
    if new_node.as_source().is_none() {
      return Err(GraphError::NotASource(new_source));
    }
    if new_node.is_closed() {
      return Err(GraphError::NodeClosed(new_source));
    }
    self.entry_mut(sink)?.inputs.insert(input, new_source);
    if let Ok(entry) = self.entry_mut(previous) {
      entry
        .outputs
        .retain(|subscription| !(subscription.sink == sink && subscription.input == input));
    }
    self.entry_mut(new_source)?.outputs.push(Subscription { sink, input });
    Ok(previous)
  }

  /// Removes every edge touching `id`.
  pub(crate) fn isolate(&mut self, id: NodeId) -> Result<(), GraphError> {
    for (input, source) in self.inputs(id) {
      self.disconnect(source, id, input)?;
    }
    let outputs = self.subscriptions(id).to_vec();
    for subscription in outputs {
      self.disconnect(id, subscription.sink, subscription.input)?;
    }
    Ok(())
  }

  /// Opens `id` unless it is already open.
  pub(crate) fn open_node(&self, id: NodeId) -> Result<(), GraphError> {
    let node = &self.entry(id)?.node;
    if node.is_open() {
      return Ok(());
    }
    node.open(id).map_err(|error| match error {
      NodeError::Graph(error) => error,
      _ => GraphError::NodeClosed(id),
    })
  }

  /// Isolates and closes `id`, leaving it in the arena.
  pub(crate) fn close_node(&mut self, id: NodeId) -> Result<(), GraphError> {
    self.isolate(id)?;
    self.entry(id)?.node.close();
    Ok(())
  }

  /// Isolates, closes and drops `id` from the arena.
  pub(crate) fn remove(&mut self, id: NodeId) -> Result<Arc<dyn Node<P>>, GraphError> {
    self.close_node(id)?;
    let entry = self.slots[id.0].take().ok_or(GraphError::UnknownNode(id))?;
    self.live -= 1;
    Ok(entry.node)
  }
}

/// Delivery handle passed to every data-path call.
///
/// Borrows the topology read guard taken at the entry point of the current
/// cascade and names the node currently being called. Outputs pushed through
/// it reach the node's subscribers synchronously.
pub struct Context<'g, P: Payload> {
  graph: &'g Graph<P>,
  topology: &'g Topology<P>,
  node: NodeId,
}

impl<'g, P: Payload> Context<'g, P> {
  pub(crate) fn new(graph: &'g Graph<P>, topology: &'g Topology<P>, node: NodeId) -> Self {
    Self {
      graph,
      topology,
      node,
    }
  }

  fn at(&self, node: NodeId) -> Context<'g, P> {
    Context::new(self.graph, self.topology, node)
  }

  /// Id of the node being called.
  pub fn node_id(&self) -> NodeId {
    self.node
  }

  /// The graph the delivery runs in.
  pub fn graph(&self) -> &'g Graph<P> {
    self.graph
  }

  /// Read view of the topology, consistent for the whole cascade.
  pub fn topology(&self) -> &'g Topology<P> {
    self.topology
  }

  /// Outgoing edges of the current node.
  pub fn subscriptions(&self) -> &'g [Subscription] {
    self.topology.subscriptions(self.node)
  }

  /// Source bound to `input` of the current node.
  pub fn source_of(&self, input: InputId) -> Option<NodeId> {
    self.topology.source_of(self.node, input)
  }

  /// Pushes `element` to every subscriber. Returns the number of deliveries.
  pub fn transfer(&self, element: TemporalObject<P>) -> usize {
    let subscriptions = self.subscriptions();
    self.record_out();
    if let Some((last, rest)) = subscriptions.split_last() {
      for subscription in rest {
        self.deliver(*subscription, element.clone());
      }
      self.deliver(*last, element);
    }
    subscriptions.len()
  }

  /// Pushes `element` to a single subscriber.
  pub fn transfer_to(&self, subscription: Subscription, element: TemporalObject<P>) {
    self.record_out();
    self.deliver(subscription, element);
  }

  /// Forwards a heartbeat to every heartbeat-capable subscriber.
  pub fn transfer_heartbeat(&self, timestamp: Timestamp) {
    if let Some(node) = self.topology.node(self.node) {
      node.metrics().record_heartbeat_out();
    }
    metrics::record_heartbeat(self.graph.name(), self.node);
    for subscription in self.subscriptions() {
      let Some(node) = self.topology.node(subscription.sink) else {
        continue;
      };
      let Some(target) = node.as_heartbeat() else {
        continue;
      };
      let ctx = self.at(subscription.sink);
      if let Err(error) = target.heartbeat(&ctx, timestamp, HeartbeatOrigin::Input(subscription.input)) {
        warn!(graph = %self.graph.name(), from = %self.node, to = %subscription.sink, %error, "heartbeat delivery failed");
      }
    }
  }

  /// Signals done to every subscriber.
  pub fn signal_done(&self) {
    debug!(graph = %self.graph.name(), node = %self.node, "signaling done");
    for subscription in self.subscriptions() {
      self.signal_done_to(*subscription);
    }
  }

  /// Signals done to a single subscriber.
  pub fn signal_done_to(&self, subscription: Subscription) {
    let Some(node) = self.topology.node(subscription.sink) else {
      return;
    };
    let Some(sink) = node.as_sink() else {
      return;
    };
    let ctx = self.at(subscription.sink);
    if let Err(error) = sink.done(&ctx, subscription.input) {
      warn!(graph = %self.graph.name(), from = %self.node, to = %subscription.sink, %error, "done delivery failed");
    }
  }

  fn record_out(&self) {
    if let Some(node) = self.topology.node(self.node) {
      node.metrics().record_out();
    }
    metrics::record_items_out(self.graph.name(), self.node, 1);
  }

  fn deliver(&self, subscription: Subscription, element: TemporalObject<P>) {
    let Some(node) = self.topology.node(subscription.sink) else {
      warn!(graph = %self.graph.name(), to = %subscription.sink, "delivery to a vanished node dropped");
      return;
    };
    let Some(sink) = node.as_sink() else {
      return;
    };
    let ctx = self.at(subscription.sink);
    if let Err(error) = sink.process(&ctx, element, subscription.input) {
      warn!(graph = %self.graph.name(), from = %self.node, to = %subscription.sink, input = subscription.input, %error, "delivery failed");
    }
  }
}

struct GraphShared<P: Payload> {
  name: String,
  topology: RwLock<Topology<P>>,
}

/// A continuous query graph. Cheap to clone; clones share the same nodes.
pub struct Graph<P: Payload> {
  shared: Arc<GraphShared<P>>,
}

impl<P: Payload> Clone for Graph<P> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

/// Non-owning handle to a [`Graph`], held by nodes that need to reach back
/// into the graph later (migration adapters) without creating a cycle.
pub struct WeakGraph<P: Payload> {
  shared: Weak<GraphShared<P>>,
}

impl<P: Payload> Clone for WeakGraph<P> {
  fn clone(&self) -> Self {
    Self {
      shared: Weak::clone(&self.shared),
    }
  }
}

impl<P: Payload> WeakGraph<P> {
  /// Returns the graph if it is still alive.
  pub fn upgrade(&self) -> Option<Graph<P>> {
    self.shared.upgrade().map(|shared| Graph { shared })
  }
}

impl<P: Payload> Graph<P> {
  /// Creates an empty graph.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      shared: Arc::new(GraphShared {
        name: name.into(),
        topology: RwLock::new(Topology::new()),
      }),
    }
  }

  /// Graph name, used in logs and metrics.
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// Returns a non-owning handle.
  pub fn downgrade(&self) -> WeakGraph<P> {
    WeakGraph {
      shared: Arc::downgrade(&self.shared),
    }
  }

  /// Adds a node and returns its id.
  pub fn add_node(&self, node: impl Node<P> + 'static) -> NodeId {
    self.add_shared_node(Arc::new(node))
  }

  /// Adds a node the caller keeps a handle to.
  pub fn add_shared_node(&self, node: Arc<dyn Node<P>>) -> NodeId {
    let name = node.name().to_string();
    let id = self.shared.topology.write().insert(node);
    trace!("Graph::add_node(graph={}, name={}, id={})", self.name(), name, id);
    id
  }

  /// Closes `id`, removes its edges and drops it from the graph.
  ///
  /// # Errors
  ///
  /// Returns [`GraphError::UnknownNode`] if `id` is not in the graph.
  pub fn remove_node(&self, id: NodeId) -> Result<Arc<dyn Node<P>>, GraphError> {
    trace!("Graph::remove_node(graph={}, id={})", self.name(), id);
    self.shared.topology.write().remove(id)
  }

  /// Returns true if `id` names a live node.
  pub fn contains(&self, id: NodeId) -> bool {
    self.shared.topology.read().contains(id)
  }

  /// Returns the node stored under `id`.
  pub fn node(&self, id: NodeId) -> Option<Arc<dyn Node<P>>> {
    self.shared.topology.read().node(id).cloned()
  }

  /// Ids of all live nodes.
  pub fn node_ids(&self) -> Vec<NodeId> {
    self.shared.topology.read().node_ids()
  }

  /// Number of live nodes.
  pub fn len(&self) -> usize {
    self.shared.topology.read().len()
  }

  /// Returns true if the graph holds no nodes.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Runs `f` against a consistent read view of the topology.
  pub fn with_topology<R>(&self, f: impl FnOnce(&Topology<P>) -> R) -> R {
    f(&self.shared.topology.read())
  }

  pub(crate) fn write_topology(&self) -> RwLockWriteGuard<'_, Topology<P>> {
    self.shared.topology.write()
  }

  /// Binds `source`'s output to input slot `input` of `sink`.
  ///
  /// # Errors
  ///
  /// Fails without touching the topology if the slot is bound (to `source`
  /// or another node), either endpoint is closed or of the wrong kind, the
  /// source refuses subscribers, or the sink rejects the input id.
  pub fn connect(&self, source: NodeId, sink: NodeId, input: InputId) -> Result<(), GraphError> {
    trace!("Graph::connect(graph={}, source={}, sink={}, input={})", self.name(), source, sink, input);
    self.shared.topology.write().connect(source, sink, input, true)
  }

  /// Removes the edge bound to input slot `input` of `sink`.
  ///
  /// In-flight deliveries finish before the edge disappears.
  ///
  /// # Errors
  ///
  /// Returns [`GraphError::NoSuchEdge`] unless `source` is bound to that slot.
  pub fn disconnect(&self, source: NodeId, sink: NodeId, input: InputId) -> Result<(), GraphError> {
    trace!("Graph::disconnect(graph={}, source={}, sink={}, input={})", self.name(), source, sink, input);
    self.shared.topology.write().disconnect(source, sink, input)
  }

  /// Outgoing edges of `source`.
  pub fn subscriptions(&self, source: NodeId) -> Vec<Subscription> {
    self.shared.topology.read().subscriptions(source).to_vec()
  }

  /// Bound inputs of `sink` as `(input, source)` pairs.
  pub fn inputs(&self, sink: NodeId) -> Vec<(InputId, NodeId)> {
    self.shared.topology.read().inputs(sink)
  }

  /// Nodes reachable from `sources` along outgoing edges (sources included).
  pub fn downstream(&self, sources: &[NodeId]) -> Vec<NodeId> {
    self.shared.topology.read().downstream(sources)
  }

  /// Nodes reaching `sinks` along incoming edges (sinks included).
  pub fn upstream(&self, sinks: &[NodeId]) -> Vec<NodeId> {
    self.shared.topology.read().upstream(sinks)
  }

  /// Opens `id`.
  ///
  /// # Errors
  ///
  /// Fails if the node is unknown or closed.
  pub fn open(&self, id: NodeId) -> Result<(), NodeError> {
    let topology = self.shared.topology.read();
    let node = topology.node(id).ok_or(GraphError::UnknownNode(id))?;
    node.open(id)
  }

  /// Opens every node that is neither open nor closed.
  ///
  /// # Errors
  ///
  /// Propagates the first open failure.
  pub fn open_all(&self) -> Result<(), NodeError> {
    let topology = self.shared.topology.read();
    for id in topology.node_ids() {
      if let Some(node) = topology.node(id) {
        if !node.is_open() && !node.is_closed() {
          node.open(id)?;
        }
      }
    }
    Ok(())
  }

  /// Unsubscribes every edge of `id` and closes it. The node stays addressable.
  ///
  /// # Errors
  ///
  /// Returns [`GraphError::UnknownNode`] if `id` is not in the graph.
  pub fn close(&self, id: NodeId) -> Result<(), GraphError> {
    debug!(graph = %self.name(), node = %id, "closing node");
    self.shared.topology.write().close_node(id)
  }

  /// Delivers `element` to input `input` of `sink`, as if its bound source
  /// had produced it.
  ///
  /// # Errors
  ///
  /// Returns the sink's error, or a graph error if `sink` is unknown or not a
  /// sink.
  pub fn process(
    &self,
    sink: NodeId,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    let topology = self.shared.topology.read();
    let node = topology.node(sink).ok_or(GraphError::UnknownNode(sink))?;
    let view = node.as_sink().ok_or(GraphError::NotASink(sink))?;
    view.process(&Context::new(self, &topology, sink), element, input)
  }

  /// Signals that input `input` of `sink` is finished.
  ///
  /// # Errors
  ///
  /// Returns the sink's error, or a graph error if `sink` is unknown or not a
  /// sink.
  pub fn done(&self, sink: NodeId, input: InputId) -> Result<(), NodeError> {
    let topology = self.shared.topology.read();
    let node = topology.node(sink).ok_or(GraphError::UnknownNode(sink))?;
    let view = node.as_sink().ok_or(GraphError::NotASink(sink))?;
    view.done(&Context::new(self, &topology, sink), input)
  }

  /// Delivers a heartbeat to `id`.
  ///
  /// # Errors
  ///
  /// Returns the node's error, or a graph error if `id` is unknown or does not
  /// accept heartbeats.
  pub fn heartbeat(
    &self,
    id: NodeId,
    timestamp: Timestamp,
    origin: HeartbeatOrigin,
  ) -> Result<(), NodeError> {
    let topology = self.shared.topology.read();
    let node = topology.node(id).ok_or(GraphError::UnknownNode(id))?;
    let view = node.as_heartbeat().ok_or(GraphError::NotHeartbeatCapable(id))?;
    view.heartbeat(&Context::new(self, &topology, id), timestamp, origin)
  }

  /// Lets source `id` produce at most one element.
  ///
  /// # Errors
  ///
  /// Returns the source's error, or a graph error if `id` is unknown or not a
  /// source.
  pub fn step_source(&self, id: NodeId) -> Result<SourceStep, NodeError> {
    let topology = self.shared.topology.read();
    let node = topology.node(id).ok_or(GraphError::UnknownNode(id))?;
    let view = node.as_source().ok_or(GraphError::NotASource(id))?;
    view.step(&Context::new(self, &topology, id))
  }

  /// Steps source `id` until it is exhausted or idle. Returns the number of
  /// emitted elements.
  ///
  /// Each step takes the read lock afresh, so structural changes can
  /// interleave between elements.
  ///
  /// # Errors
  ///
  /// Propagates the first step failure.
  pub fn drain_source(&self, id: NodeId) -> Result<usize, NodeError> {
    let mut emitted = 0;
    while self.step_source(id)? == SourceStep::Emitted {
      emitted += 1;
    }
    Ok(emitted)
  }

  /// Returns true if `id` is a sink that has completed.
  pub fn is_done(&self, id: NodeId) -> bool {
    self
      .node(id)
      .is_some_and(|node| node.as_sink().is_some_and(|sink| sink.is_done()))
  }

  /// Current minimum timestamp of `id`, for heartbeat-capable nodes.
  pub fn min_timestamp(&self, id: NodeId) -> Option<Timestamp> {
    self.node(id)?.as_heartbeat()?.min_timestamp()
  }

  /// The ordering violation that faulted `id`, if any.
  pub fn fault(&self, id: NodeId) -> Option<OrderingViolation> {
    self.node(id)?.fault()
  }

  /// Metadata snapshot of `id`.
  pub fn metadata(&self, id: NodeId) -> Option<MetaDataSnapshot> {
    let topology = self.shared.topology.read();
    let node = topology.node(id)?;
    Some(node.metrics().snapshot(
      id,
      node.name(),
      node.descriptor(),
      topology.subscriptions(id).len(),
    ))
  }

  /// Enables or disables heartbeats on every node reachable downstream of
  /// `sources`.
  pub fn set_heartbeats_active_bottom_up(&self, sources: &[NodeId], active: bool) {
    let topology = self.shared.topology.read();
    for id in topology.downstream(sources) {
      if let Some(view) = topology.node(id).and_then(|node| node.as_heartbeat()) {
        view.set_heartbeats_active(active);
      }
    }
  }

  /// Enables or disables heartbeats on every node upstream of `sinks`.
  pub fn set_heartbeats_active_top_down(&self, sinks: &[NodeId], active: bool) {
    let topology = self.shared.topology.read();
    for id in topology.upstream(sinks) {
      if let Some(view) = topology.node(id).and_then(|node| node.as_heartbeat()) {
        view.set_heartbeats_active(active);
      }
    }
  }

  /// Installs a fresh predicate from `factory` on every heartbeat-capable
  /// node reachable downstream of `sources`.
  pub fn set_heartbeat_predicate_bottom_up(
    &self,
    sources: &[NodeId],
    factory: impl Fn() -> Box<dyn HeartbeatPredicate>,
  ) {
    let topology = self.shared.topology.read();
    for id in topology.downstream(sources) {
      if let Some(view) = topology.node(id).and_then(|node| node.as_heartbeat()) {
        view.set_heartbeat_predicate(factory());
      }
    }
  }

  /// Installs a fresh predicate from `factory` on every heartbeat-capable
  /// node upstream of `sinks`.
  pub fn set_heartbeat_predicate_top_down(
    &self,
    sinks: &[NodeId],
    factory: impl Fn() -> Box<dyn HeartbeatPredicate>,
  ) {
    let topology = self.shared.topology.read();
    for id in topology.upstream(sinks) {
      if let Some(view) = topology.node(id).and_then(|node| node.as_heartbeat()) {
        view.set_heartbeat_predicate(factory());
      }
    }
  }
}
