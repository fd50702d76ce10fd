//! # Plan Migration
//!
//! Replaces a running subgraph (the *old plan*) by another one (the *new
//! plan*) at a logical reference point `T`, without losing or duplicating
//! output.
//!
//! [`MigrationPlan::start`] installs two kinds of adapters under the graph's
//! write lock and returns immediately:
//!
//! - a [`ReferencePointSplit`] between each source and the old plan entry it
//!   feeds. Elements starting before `T` go to the old plan; elements ending
//!   after `T` go to the new plan with their start raised to `T - 1`. The
//!   first element starting at or after `T` finishes the old plan's input.
//! - a [`ReferencePointUnion`] between each old plan exit and the sink it
//!   feeds. Old plan output passes straight through; new plan output is held
//!   back (dropping the `T - 1` boundary copies) until the old plan is done,
//!   then flushed and passed through.
//!
//! Every adapter counts down a shared session once. When the last one does, a
//! closer thread named `plan-migration-closer` takes the write lock, wires the
//! sources and sinks directly to the new plan, removes the adapters, closes
//! the old plan and finally runs the completion callback.
//!
//! ```rust,no_run
//! use timeweave::graph::Graph;
//! use timeweave::migration::MigrationPlan;
//! # fn ids() -> [timeweave::node::NodeId; 6] { unimplemented!() }
//!
//! let graph: Graph<i64> = Graph::new("q");
//! let [source, old_entry, new_entry, sink, old_exit, new_exit] = ids();
//! let handle = MigrationPlan::new(100)
//!   .split(source, old_entry, new_entry)
//!   .union(sink, old_exit, new_exit)
//!   .start(&graph, |report| println!("migrated: {report:?}"))?;
//! # let _ = handle;
//! # Ok::<(), timeweave::error::MigrationError>(())
//! ```

use crate::error::{GraphError, MigrationError, NodeError};
use crate::graph::{Graph, Subscription, Topology, WeakGraph};
use crate::metadata::{OperatorDescriptor, STATEFUL_METADATA};
use crate::metrics;
use crate::node::{InputId, NodeId};
use crate::operators::{Emitter, Operator, TemporalPipe};
use crate::time::{Payload, TemporalObject, Timestamp};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

static SPLIT: OperatorDescriptor = OperatorDescriptor::new("reference-point-split", STATEFUL_METADATA);
static UNION: OperatorDescriptor = OperatorDescriptor::new("reference-point-union", STATEFUL_METADATA);

const CLOSER_THREAD: &str = "plan-migration-closer";

/// Input of a union carrying the old plan's output.
pub const OLD_PLAN_INPUT: InputId = 0;
/// Input of a union carrying the new plan's output.
pub const NEW_PLAN_INPUT: InputId = 1;

/// Start the new plan sees for elements straddling the reference point.
fn boundary(reference_point: Timestamp) -> Timestamp {
  reference_point.saturating_sub(1)
}

/// What to replace and when.
///
/// The three source lists and the three sink lists are parallel: entry `i` of
/// `sources` feeds `to_old_plan[i]` today and will feed `to_new_plan[i]`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MigrationPlan {
  /// Reference point `T`.
  pub reference_point: Timestamp,
  /// Sources feeding the old plan.
  pub sources: Vec<NodeId>,
  /// Old plan entry fed by each source.
  pub to_old_plan: Vec<NodeId>,
  /// New plan entry to feed from each source.
  pub to_new_plan: Vec<NodeId>,
  /// Sinks fed by the old plan.
  pub sinks: Vec<NodeId>,
  /// Old plan exit feeding each sink.
  pub from_old_plan: Vec<NodeId>,
  /// New plan exit to feed each sink from.
  pub from_new_plan: Vec<NodeId>,
}

impl MigrationPlan {
  /// Creates an empty plan switching at `reference_point`.
  pub fn new(reference_point: Timestamp) -> Self {
    Self {
      reference_point,
      ..Self::default()
    }
  }

  /// Adds a source whose edge into `old_entry` moves to `new_entry`.
  #[must_use]
  pub fn split(mut self, source: NodeId, old_entry: NodeId, new_entry: NodeId) -> Self {
    self.sources.push(source);
    self.to_old_plan.push(old_entry);
    self.to_new_plan.push(new_entry);
    self
  }

  /// Adds a sink whose edge from `old_exit` moves to `new_exit`.
  #[must_use]
  pub fn union(mut self, sink: NodeId, old_exit: NodeId, new_exit: NodeId) -> Self {
    self.sinks.push(sink);
    self.from_old_plan.push(old_exit);
    self.from_new_plan.push(new_exit);
    self
  }

  /// Validates the plan, installs the adapters and opens the new plan.
  ///
  /// `on_complete` runs exactly once, on the closer thread, after the graph
  /// has been rewired. A plan without sources and sinks completes right away
  /// on the calling thread.
  ///
  /// # Errors
  ///
  /// Returns [`MigrationError::DimensionMismatch`] when the parallel lists
  /// differ in length, [`MigrationError::NotConnected`] when a listed edge does
  /// not exist, and a graph error when a new plan node is unknown, of the
  /// wrong kind, or already bound on the slot it is to take over. All of these
  /// are detected before anything is installed.
  pub fn start<P: Payload>(
    self,
    graph: &Graph<P>,
    on_complete: impl FnOnce(&MigrationReport) + Send + 'static,
  ) -> Result<MigrationHandle<P>, MigrationError> {
    trace!("MigrationPlan::start(graph={}, reference_point={})", graph.name(), self.reference_point);
    let session = {
      let mut topology = graph.write_topology();
      let wiring = self.validate(&topology)?;
      let session = Arc::new(MigrationSession::new(
        graph.downgrade(),
        self.reference_point,
        wiring.splits.len() + wiring.unions.len(),
        Box::new(on_complete),
      ));
      install(&mut topology, &session, wiring)?;
      session
    };
    metrics::record_migration(graph.name(), "started");
    debug!(
      graph = %graph.name(),
      reference_point = self.reference_point,
      splits = self.sources.len(),
      unions = self.sinks.len(),
      "plan migration started"
    );
    if session.remaining() == 0 {
      session.close();
    }
    Ok(MigrationHandle { session })
  }

  fn validate<P: Payload>(&self, topology: &Topology<P>) -> Result<Wiring, MigrationError> {
    if self.sources.len() != self.to_old_plan.len() || self.sources.len() != self.to_new_plan.len() {
      return Err(MigrationError::DimensionMismatch(format!(
        "{} sources, {} old plan entries, {} new plan entries",
        self.sources.len(),
        self.to_old_plan.len(),
        self.to_new_plan.len()
      )));
    }
    if self.sinks.len() != self.from_old_plan.len() || self.sinks.len() != self.from_new_plan.len() {
      return Err(MigrationError::DimensionMismatch(format!(
        "{} sinks, {} old plan exits, {} new plan exits",
        self.sinks.len(),
        self.from_old_plan.len(),
        self.from_new_plan.len()
      )));
    }

    let mut splits = Vec::with_capacity(self.sources.len());
    for ((&source, &old_entry), &new_entry) in self
      .sources
      .iter()
      .zip(&self.to_old_plan)
      .zip(&self.to_new_plan)
    {
      let input = topology
        .subscription_between(source, old_entry)
        .ok_or(MigrationError::NotConnected {
          source_node: source,
          sink: old_entry,
        })?;
      let node = topology.node(new_entry).ok_or(GraphError::UnknownNode(new_entry))?;
      if node.as_sink().is_none() {
        return Err(GraphError::NotASink(new_entry).into());
      }
      if node.is_closed() {
        return Err(GraphError::NodeClosed(new_entry).into());
      }
      if let Some(bound) = topology.source_of(new_entry, input) {
        return Err(
          GraphError::SlotOccupied {
            sink: new_entry,
            input,
            bound,
          }
          .into(),
        );
      }
      splits.push(SplitWiring {
        source,
        old_entry,
        new_entry,
        input,
        adapter: None,
      });
    }

    let mut unions = Vec::with_capacity(self.sinks.len());
    for ((&sink, &old_exit), &new_exit) in self
      .sinks
      .iter()
      .zip(&self.from_old_plan)
      .zip(&self.from_new_plan)
    {
      let input = topology
        .subscription_between(old_exit, sink)
        .ok_or(MigrationError::NotConnected {
          source_node: old_exit,
          sink,
        })?;
      let node = topology.node(new_exit).ok_or(GraphError::UnknownNode(new_exit))?;
      if node.as_source().is_none() {
        return Err(GraphError::NotASource(new_exit).into());
      }
      if node.is_closed() {
        return Err(GraphError::NodeClosed(new_exit).into());
      }
      unions.push(UnionWiring {
        sink,
        old_exit,
        new_exit,
        input,
        adapter: None,
      });
    }

    let new_plan = plan_nodes(topology, &self.to_new_plan, &self.from_new_plan);
    let mut old_plan = plan_nodes(topology, &self.to_old_plan, &self.from_old_plan);
    let endpoints: HashSet<NodeId> = self.sources.iter().chain(&self.sinks).copied().collect();
    old_plan.retain(|id| !new_plan.contains(id) && !endpoints.contains(id));

    Ok(Wiring {
      splits,
      unions,
      old_plan,
      new_plan,
    })
  }
}

/// Nodes on some path from `entries` to `exits`.
fn plan_nodes<P: Payload>(topology: &Topology<P>, entries: &[NodeId], exits: &[NodeId]) -> Vec<NodeId> {
  let upstream: HashSet<NodeId> = topology.upstream(exits).into_iter().collect();
  topology
    .downstream(entries)
    .into_iter()
    .filter(|id| upstream.contains(id))
    .collect()
}

#[derive(Clone, Debug)]
struct SplitWiring {
  source: NodeId,
  old_entry: NodeId,
  new_entry: NodeId,
  input: InputId,
  adapter: Option<NodeId>,
}

#[derive(Clone, Debug)]
struct UnionWiring {
  sink: NodeId,
  old_exit: NodeId,
  new_exit: NodeId,
  input: InputId,
  adapter: Option<NodeId>,
}

#[derive(Clone, Debug, Default)]
struct Wiring {
  splits: Vec<SplitWiring>,
  unions: Vec<UnionWiring>,
  old_plan: Vec<NodeId>,
  new_plan: Vec<NodeId>,
}

fn heartbeats_active<P: Payload>(topology: &Topology<P>, id: NodeId) -> bool {
  topology
    .node(id)
    .and_then(|node| node.as_heartbeat())
    .is_some_and(|view| view.heartbeats_active())
}

fn install<P: Payload>(
  topology: &mut Topology<P>,
  session: &Arc<MigrationSession<P>>,
  mut wiring: Wiring,
) -> Result<(), MigrationError> {
  let reference_point = session.reference_point;

  for &id in &wiring.new_plan {
    topology.open_node(id)?;
  }

  for split in &mut wiring.splits {
    let operator = ReferencePointSplit::new(
      reference_point,
      Subscription {
        sink: split.old_entry,
        input: split.input,
      },
      Subscription {
        sink: split.new_entry,
        input: split.input,
      },
      Arc::clone(session),
    );
    let node = Arc::new(
      TemporalPipe::new(format!("split[{}->{}]", split.source, split.old_entry), operator)
        .with_heartbeats(heartbeats_active(topology, split.old_entry)),
    );
    let id = topology.insert(node);
    topology.rebind(split.old_entry, split.input, id)?;
    topology.connect(split.source, id, 0, true)?;
    topology.connect(id, split.new_entry, split.input, false)?;
    topology.open_node(id)?;
    split.adapter = Some(id);
    trace!("MigrationPlan::install(split={}, source={}, old={}, new={})", id, split.source, split.old_entry, split.new_entry);
  }

  for union in &mut wiring.unions {
    let operator = ReferencePointUnion::new(reference_point, Arc::clone(session));
    let node = Arc::new(
      TemporalPipe::new(format!("union[{}->{}]", union.old_exit, union.sink), operator)
        .with_heartbeats(heartbeats_active(topology, union.old_exit)),
    );
    let id = topology.insert(node);
    topology.rebind(union.sink, union.input, id)?;
    topology.connect(union.old_exit, id, OLD_PLAN_INPUT, true)?;
    topology.connect(union.new_exit, id, NEW_PLAN_INPUT, true)?;
    topology.open_node(id)?;
    union.adapter = Some(id);
    trace!("MigrationPlan::install(union={}, sink={}, old={}, new={})", id, union.sink, union.old_exit, union.new_exit);
  }

  *session.wiring.lock() = wiring;
  Ok(())
}

/// Outcome of a finished migration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MigrationReport {
  /// Reference point the plans switched at.
  pub reference_point: Timestamp,
  /// Removed split adapters.
  pub splits: Vec<NodeId>,
  /// Removed union adapters.
  pub unions: Vec<NodeId>,
  /// Closed old plan nodes.
  pub closed: Vec<NodeId>,
  /// Rewiring steps that failed. The closer carries on past them.
  pub errors: Vec<GraphError>,
}

type Callback = Box<dyn FnOnce(&MigrationReport) + Send>;

struct MigrationSession<P: Payload> {
  graph: WeakGraph<P>,
  reference_point: Timestamp,
  remaining: AtomicUsize,
  wiring: Mutex<Wiring>,
  callback: Mutex<Option<Callback>>,
  outcome: Mutex<Option<MigrationReport>>,
  finished: Condvar,
}

impl<P: Payload> MigrationSession<P> {
  fn new(graph: WeakGraph<P>, reference_point: Timestamp, adapters: usize, callback: Callback) -> Self {
    Self {
      graph,
      reference_point,
      remaining: AtomicUsize::new(adapters),
      wiring: Mutex::new(Wiring::default()),
      callback: Mutex::new(Some(callback)),
      outcome: Mutex::new(None),
      finished: Condvar::new(),
    }
  }

  fn remaining(&self) -> usize {
    self.remaining.load(Ordering::Acquire)
  }

  /// Called once per adapter. The last arrival hands over to the closer.
  ///
  /// Arrivals happen inside a delivery, under the graph's read lock, so the
  /// closer has to run on its own thread.
  fn arrive(self: &Arc<Self>) {
    let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
    trace!("MigrationSession::arrive(remaining={})", previous.saturating_sub(1));
    if previous != 1 {
      return;
    }
    let session = Arc::clone(self);
    let spawned = std::thread::Builder::new()
      .name(CLOSER_THREAD.to_string())
      .spawn(move || session.close());
    if let Err(error) = spawned {
      warn!(%error, "failed to spawn the migration closer");
    }
  }

  /// Rewires the graph to the new plan and reports completion.
  fn close(&self) {
    let wiring = self.wiring.lock().clone();
    let mut report = MigrationReport {
      reference_point: self.reference_point,
      ..MigrationReport::default()
    };
    match self.graph.upgrade() {
      Some(graph) => {
        {
          let mut topology = graph.write_topology();
          rewire(&mut topology, &wiring, &mut report);
        }
        metrics::record_migration(graph.name(), "completed");
        debug!(
          graph = %graph.name(),
          reference_point = self.reference_point,
          closed = report.closed.len(),
          errors = report.errors.len(),
          "plan migration completed"
        );
      }
      None => warn!("graph dropped before the plan migration completed"),
    }
    if let Some(callback) = self.callback.lock().take() {
      callback(&report);
    }
    *self.outcome.lock() = Some(report);
    self.finished.notify_all();
  }
}

fn rewire<P: Payload>(topology: &mut Topology<P>, wiring: &Wiring, report: &mut MigrationReport) {
  let mut record = |result: Result<(), GraphError>| {
    if let Err(error) = result {
      warn!(%error, "migration rewiring step failed");
      report.errors.push(error);
    }
  };
  for split in &wiring.splits {
    let Some(adapter) = split.adapter else { continue };
    record(topology.rebind(split.new_entry, split.input, split.source).map(drop));
    record(topology.remove(adapter).map(drop));
  }
  for union in &wiring.unions {
    let Some(adapter) = union.adapter else { continue };
    record(topology.rebind(union.sink, union.input, union.new_exit).map(drop));
    record(topology.remove(adapter).map(drop));
  }
  for &id in &wiring.old_plan {
    record(topology.close_node(id));
  }
  report.splits = wiring.splits.iter().filter_map(|split| split.adapter).collect();
  report.unions = wiring.unions.iter().filter_map(|union| union.adapter).collect();
  report.closed = wiring.old_plan.clone();
}

/// Caller's view of a running migration.
pub struct MigrationHandle<P: Payload> {
  session: Arc<MigrationSession<P>>,
}

impl<P: Payload> MigrationHandle<P> {
  /// Adapters that have not finished yet.
  pub fn remaining(&self) -> usize {
    self.session.remaining()
  }

  /// Returns true once the closer has run.
  pub fn is_complete(&self) -> bool {
    self.session.outcome.lock().is_some()
  }

  /// Ids of the installed split adapters.
  pub fn splits(&self) -> Vec<NodeId> {
    self.session.wiring.lock().splits.iter().filter_map(|split| split.adapter).collect()
  }

  /// Ids of the installed union adapters.
  pub fn unions(&self) -> Vec<NodeId> {
    self.session.wiring.lock().unions.iter().filter_map(|union| union.adapter).collect()
  }

  /// Blocks until the migration completes or `timeout` elapses.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<MigrationReport> {
    let deadline = Instant::now() + timeout;
    let mut outcome = self.session.outcome.lock();
    while outcome.is_none() {
      if self.session.finished.wait_until(&mut outcome, deadline).timed_out() {
        break;
      }
    }
    outcome.clone()
  }
}

/// Counts an adapter down at most once.
struct Arrival<P: Payload> {
  session: Arc<MigrationSession<P>>,
  arrived: bool,
}

impl<P: Payload> Arrival<P> {
  fn new(session: Arc<MigrationSession<P>>) -> Self {
    Self {
      session,
      arrived: false,
    }
  }

  fn arrive(&mut self) {
    if !self.arrived {
      self.arrived = true;
      self.session.arrive();
    }
  }
}

/// Forks a source between the old and the new plan at the reference point.
///
/// Refuses subscriptions: its two outgoing edges are fixed at installation.
pub struct ReferencePointSplit<P: Payload> {
  reference_point: Timestamp,
  old_plan: Subscription,
  new_plan: Subscription,
  old_plan_done: bool,
  arrival: Arrival<P>,
}

impl<P: Payload> ReferencePointSplit<P> {
  fn new(
    reference_point: Timestamp,
    old_plan: Subscription,
    new_plan: Subscription,
    session: Arc<MigrationSession<P>>,
  ) -> Self {
    Self {
      reference_point,
      old_plan,
      new_plan,
      old_plan_done: false,
      arrival: Arrival::new(session),
    }
  }

  /// Returns true once the old plan has been told its input is finished.
  pub fn old_plan_done(&self) -> bool {
    self.old_plan_done
  }

  fn has_edge(emitter: &Emitter<'_, '_, P>, subscription: Subscription) -> bool {
    emitter.subscriptions().contains(&subscription)
  }

  fn finish_old_plan(&mut self, emitter: &mut Emitter<'_, '_, P>) {
    if self.old_plan_done {
      return;
    }
    self.old_plan_done = true;
    if Self::has_edge(emitter, self.old_plan) {
      emitter.signal_done_to(self.old_plan);
    }
    debug!(graph = %emitter.graph_name(), node = %emitter.node_id(), "split finished the old plan");
    self.arrival.arrive();
  }
}

impl<P: Payload> Operator<P> for ReferencePointSplit<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &SPLIT
  }

  fn accepts_input(&self, input: InputId) -> bool {
    input == 0
  }

  fn accepts_subscriptions(&self) -> bool {
    false
  }

  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    _input: InputId,
  ) -> Result<(), NodeError> {
    if element.start() >= self.reference_point {
      self.finish_old_plan(emitter);
    }
    if element.end() > self.reference_point && Self::has_edge(emitter, self.new_plan) {
      if let Some(interval) = element.interval().clip_start(boundary(self.reference_point)) {
        emitter.transfer_to(self.new_plan, element.clone().with_interval(interval));
      }
    }
    if element.start() < self.reference_point && !self.old_plan_done && Self::has_edge(emitter, self.old_plan) {
      emitter.transfer_to(self.old_plan, element);
    }
    Ok(())
  }

  fn on_all_done(&mut self, emitter: &mut Emitter<'_, '_, P>) -> Result<(), NodeError> {
    self.finish_old_plan(emitter);
    Ok(())
  }
}

/// Merges old and new plan output in front of a sink.
///
/// Input [`OLD_PLAN_INPUT`] passes straight through. Input
/// [`NEW_PLAN_INPUT`] is buffered until the old plan is done; elements
/// starting exactly at `T - 1` are boundary copies of old plan output and are
/// dropped (for `T > 0`).
pub struct ReferencePointUnion<P: Payload> {
  reference_point: Timestamp,
  buffer: VecDeque<TemporalObject<P>>,
  old_plan_done: bool,
  arrival: Arrival<P>,
}

impl<P: Payload> ReferencePointUnion<P> {
  fn new(reference_point: Timestamp, session: Arc<MigrationSession<P>>) -> Self {
    Self {
      reference_point,
      buffer: VecDeque::new(),
      old_plan_done: false,
      arrival: Arrival::new(session),
    }
  }

  /// New plan elements waiting for the old plan to finish.
  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }

  fn is_boundary_copy(&self, element: &TemporalObject<P>) -> bool {
    self.reference_point > 0 && element.start() == boundary(self.reference_point)
  }

  fn flush(&mut self, emitter: &mut Emitter<'_, '_, P>) {
    for element in self.buffer.drain(..) {
      emitter.transfer(element);
    }
  }
}

impl<P: Payload> Operator<P> for ReferencePointUnion<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &UNION
  }

  fn accepts_input(&self, input: InputId) -> bool {
    input == OLD_PLAN_INPUT || input == NEW_PLAN_INPUT
  }

  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    if input == OLD_PLAN_INPUT {
      emitter.transfer(element);
    } else if self.is_boundary_copy(&element) {
      trace!("ReferencePointUnion::process_object(node={}) boundary copy dropped", emitter.node_id());
    } else if self.old_plan_done {
      emitter.transfer(element);
    } else {
      self.buffer.push_back(element);
    }
    Ok(())
  }

  fn process_heartbeat(
    &mut self,
    _emitter: &mut Emitter<'_, '_, P>,
    min: Timestamp,
  ) -> Result<Option<Timestamp>, NodeError> {
    Ok(Some(self.buffer.front().map_or(min, |held| held.start().min(min))))
  }

  fn on_input_done(&mut self, emitter: &mut Emitter<'_, '_, P>, input: InputId) -> Result<(), NodeError> {
    if input == OLD_PLAN_INPUT && !self.old_plan_done {
      self.old_plan_done = true;
      self.flush(emitter);
      debug!(graph = %emitter.graph_name(), node = %emitter.node_id(), "union released the new plan");
      self.arrival.arrive();
    }
    Ok(())
  }

  fn on_all_done(&mut self, emitter: &mut Emitter<'_, '_, P>) -> Result<(), NodeError> {
    self.flush(emitter);
    self.arrival.arrive();
    Ok(())
  }

  fn state_size(&self) -> usize {
    self.buffer.len()
  }
}
