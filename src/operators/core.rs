//! The temporal operator core.
//!
//! Every temporal operator is a [`TemporalPipe`]: a generic node that owns an
//! [`OperatorCore`] (per-input timestamp bounds, heartbeat state, lifecycle
//! and done bookkeeping) and an operator-specific [`Operator`] strategy. The
//! pipe runs the shared protocol around each call into the strategy:
//!
//! 1. reject the call if the node is closed, faulted or not yet open;
//! 2. record the element's start (or the heartbeat value) for its input and
//!    fault on an ordering violation;
//! 3. hand the element to [`Operator::process_object`];
//! 4. once the minimum timestamp is known, let the operator expire state in
//!    [`Operator::process_heartbeat`] and forward the bound it returns as a
//!    heartbeat, if heartbeats are active, the bound advanced and the
//!    predicate agrees;
//! 5. after the last input is done (or the operator asks for it), flush with
//!    [`Operator::on_all_done`] and signal done downstream, exactly once.
//!
//! Data, done signals and heartbeats are serialized by one mutex per node.

use crate::config::HeartbeatConfig;
use crate::error::{NodeError, OrderingBound, OrderingViolation};
use crate::graph::{Context, Subscription};
use crate::heartbeat::{Always, HeartbeatPredicate, HeartbeatState};
use crate::metadata::{NodeMetrics, OperatorDescriptor};
use crate::metrics;
use crate::node::{HeartbeatCapable, HeartbeatOrigin, InputId, Node, NodeId, Sink, Source};
use crate::time::{INFINITY, Payload, TemporalObject, Timestamp};
use parking_lot::Mutex;
use std::marker::PhantomData;
use tracing::{debug, trace, warn};

#[derive(Clone, Copy, Debug)]
struct InputState {
  id: InputId,
  latest: Option<Timestamp>,
  signaled: Option<Timestamp>,
  done: bool,
}

/// Timestamp, heartbeat and lifecycle state shared by all temporal operators.
pub struct OperatorCore {
  inputs: Vec<InputState>,
  last_heartbeat: Option<Timestamp>,
  heartbeats_active: bool,
  predicate: Box<dyn HeartbeatPredicate>,
  opened: bool,
  closed: bool,
  done_signaled: bool,
  fault: Option<OrderingViolation>,
}

impl Default for OperatorCore {
  fn default() -> Self {
    Self::new()
  }
}

impl OperatorCore {
  /// Creates a core without inputs and with heartbeats inactive.
  pub fn new() -> Self {
    Self {
      inputs: Vec::new(),
      last_heartbeat: None,
      heartbeats_active: false,
      predicate: Box::new(Always),
      opened: false,
      closed: false,
      done_signaled: false,
      fault: None,
    }
  }

  fn input(&self, input: InputId) -> Option<&InputState> {
    self.inputs.iter().find(|state| state.id == input)
  }

  fn input_mut(&mut self, node: NodeId, input: InputId) -> Result<&mut InputState, NodeError> {
    self
      .inputs
      .iter_mut()
      .find(|state| state.id == input)
      .ok_or(NodeError::UnknownInput { node, input })
  }

  /// Bound input ids in ascending order.
  pub fn input_ids(&self) -> Vec<InputId> {
    self.inputs.iter().map(|state| state.id).collect()
  }

  /// Latest timestamp of `input`, `None` while it has no bound yet.
  pub fn latest(&self, input: InputId) -> Option<Timestamp> {
    self.input(input).and_then(|state| state.latest)
  }

  /// Minimum over all inputs' latest timestamps. `None` while any input has
  /// no bound yet, or without inputs.
  pub fn min_timestamp(&self) -> Option<Timestamp> {
    if self.inputs.is_empty() {
      return None;
    }
    self
      .inputs
      .iter()
      .map(|state| state.latest)
      .try_fold(INFINITY, |min, latest| latest.map(|latest| min.min(latest)))
  }

  /// Last heartbeat forwarded downstream.
  pub fn last_heartbeat(&self) -> Option<Timestamp> {
    self.last_heartbeat
  }

  /// Returns true if `input` has signaled done.
  pub fn received_done(&self, input: InputId) -> bool {
    self.input(input).is_some_and(|state| state.done)
  }

  /// Returns true if every bound input has signaled done.
  pub fn all_done(&self) -> bool {
    !self.inputs.is_empty() && self.inputs.iter().all(|state| state.done)
  }

  /// Returns true once done was signaled downstream.
  pub fn is_done(&self) -> bool {
    self.done_signaled
  }

  fn add_input(&mut self, input: InputId) -> bool {
    if self.input(input).is_some() {
      return false;
    }
    let at = self.inputs.partition_point(|state| state.id < input);
    self.inputs.insert(
      at,
      InputState {
        id: input,
        latest: None,
        signaled: None,
        done: false,
      },
    );
    true
  }

  fn remove_input(&mut self, input: InputId) {
    self.inputs.retain(|state| state.id != input);
  }

  fn ensure_live(&self, node: NodeId) -> Result<(), NodeError> {
    if self.closed {
      return Err(NodeError::Closed(node));
    }
    if let Some(violation) = &self.fault {
      return Err(NodeError::Faulted {
        node,
        violation: violation.clone(),
      });
    }
    Ok(())
  }

  fn observe(&mut self, node: NodeId, input: InputId, timestamp: Timestamp) -> Result<(), NodeError> {
    let state = self.input_mut(node, input)?;
    if let Some(signaled) = state.signaled.filter(|signaled| timestamp < *signaled) {
      return Err(NodeError::Ordering(OrderingViolation {
        node,
        input,
        timestamp,
        bound: OrderingBound::LastHeartbeat,
        bound_value: signaled,
      }));
    }
    state.latest = Some(state.latest.map_or(timestamp, |latest| latest.max(timestamp)));
    Ok(())
  }

  fn observe_heartbeat(
    &mut self,
    node: NodeId,
    timestamp: Timestamp,
    origin: HeartbeatOrigin,
  ) -> Result<(), NodeError> {
    match origin {
      HeartbeatOrigin::Input(input) => {
        let state = self.input_mut(node, input)?;
        state.latest = Some(state.latest.map_or(timestamp, |latest| latest.max(timestamp)));
        state.signaled = Some(state.signaled.map_or(timestamp, |signaled| signaled.max(timestamp)));
      }
      HeartbeatOrigin::MemoryManager => {
        for state in &mut self.inputs {
          state.latest = Some(state.latest.map_or(timestamp, |latest| latest.max(timestamp)));
        }
      }
    }
    Ok(())
  }

  fn mark_done(&mut self, node: NodeId, input: InputId) -> Result<bool, NodeError> {
    let state = self.input_mut(node, input)?;
    if state.done {
      return Ok(false);
    }
    state.done = true;
    state.latest = Some(INFINITY);
    Ok(true)
  }

  /// Returns true if `bound` may be forwarded now.
  fn heartbeat_due(&mut self, bound: Timestamp) -> bool {
    if !self.heartbeats_active || !self.opened || bound == INFINITY {
      return false;
    }
    if self.last_heartbeat.is_some_and(|last| bound <= last) {
      return false;
    }
    let latest: Vec<Option<Timestamp>> = self.inputs.iter().map(|state| state.latest).collect();
    let state = HeartbeatState {
      latest: &latest,
      min_timestamp: bound,
      last_heartbeat: self.last_heartbeat,
    };
    self.predicate.should_emit(&state)
  }
}

/// Output handle given to an [`Operator`] while it processes.
pub struct Emitter<'a, 'g, P: Payload> {
  ctx: &'a Context<'g, P>,
  core: &'a OperatorCore,
  done_requested: bool,
}

impl<'a, 'g, P: Payload> Emitter<'a, 'g, P> {
  fn new(ctx: &'a Context<'g, P>, core: &'a OperatorCore) -> Self {
    Self {
      ctx,
      core,
      done_requested: false,
    }
  }

  /// Id of the node.
  pub fn node_id(&self) -> NodeId {
    self.ctx.node_id()
  }

  /// Name of the graph, for logs.
  pub fn graph_name(&self) -> &str {
    self.ctx.graph().name()
  }

  /// Pushes `element` to every subscriber.
  pub fn transfer(&mut self, element: TemporalObject<P>) {
    self.ctx.transfer(element);
  }

  /// Pushes `element` to a single subscriber.
  pub fn transfer_to(&mut self, subscription: Subscription, element: TemporalObject<P>) {
    self.ctx.transfer_to(subscription, element);
  }

  /// Signals done to a single subscriber.
  pub fn signal_done_to(&mut self, subscription: Subscription) {
    self.ctx.signal_done_to(subscription);
  }

  /// Outgoing edges of the node.
  pub fn subscriptions(&self) -> &'g [Subscription] {
    self.ctx.subscriptions()
  }

  /// Current minimum timestamp over all inputs.
  pub fn min_timestamp(&self) -> Option<Timestamp> {
    self.core.min_timestamp()
  }

  /// Latest timestamp of `input`.
  pub fn latest(&self, input: InputId) -> Option<Timestamp> {
    self.core.latest(input)
  }

  /// Returns true if `input` has signaled done.
  pub fn received_done(&self, input: InputId) -> bool {
    self.core.received_done(input)
  }

  /// Asks the pipe to flush and signal done downstream once the current call
  /// returns, without waiting for the remaining inputs.
  pub fn request_done(&mut self) {
    self.done_requested = true;
  }
}

/// Operator-specific behavior plugged into a [`TemporalPipe`].
pub trait Operator<P: Payload>: Send + 'static {
  /// Static description of the operator kind.
  fn descriptor(&self) -> &'static OperatorDescriptor;

  /// Returns false to reject binding `input`.
  fn accepts_input(&self, _input: InputId) -> bool {
    true
  }

  /// Returns false while the operator refuses new subscribers.
  fn accepts_subscriptions(&self) -> bool {
    true
  }

  /// Processes an element that passed the ordering check.
  ///
  /// # Errors
  ///
  /// Errors are returned to the delivering caller; the node stays usable.
  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError>;

  /// Called after every element, heartbeat and input completion once the
  /// minimum timestamp `min` is known. Expires state against `min` and
  /// returns the bound the operator can guarantee for its own output, or
  /// `None` if it cannot vouch for any.
  ///
  /// # Errors
  ///
  /// Errors are returned to the delivering caller.
  fn process_heartbeat(
    &mut self,
    _emitter: &mut Emitter<'_, '_, P>,
    min: Timestamp,
  ) -> Result<Option<Timestamp>, NodeError> {
    Ok(Some(min))
  }

  /// Called when `input` signals done.
  ///
  /// # Errors
  ///
  /// Errors are returned to the delivering caller.
  fn on_input_done(
    &mut self,
    _emitter: &mut Emitter<'_, '_, P>,
    _input: InputId,
  ) -> Result<(), NodeError> {
    Ok(())
  }

  /// Flushes remaining state right before done is signaled downstream.
  ///
  /// # Errors
  ///
  /// Errors are logged; done is signaled regardless.
  fn on_all_done(&mut self, _emitter: &mut Emitter<'_, '_, P>) -> Result<(), NodeError> {
    Ok(())
  }

  /// Elements currently held.
  fn state_size(&self) -> usize {
    0
  }

  /// Estimated bytes held.
  fn memory_usage(&self) -> usize {
    0
  }

  /// Releases state when the node closes.
  fn close(&mut self) {}
}

struct PipeState<O> {
  core: OperatorCore,
  operator: O,
}

/// Generic temporal node: an [`OperatorCore`] driving an [`Operator`].
pub struct TemporalPipe<P: Payload, O: Operator<P>> {
  name: String,
  descriptor: &'static OperatorDescriptor,
  state: Mutex<PipeState<O>>,
  metrics: NodeMetrics,
  _payload: PhantomData<fn() -> P>,
}

impl<P: Payload, O: Operator<P>> TemporalPipe<P, O> {
  /// Wraps `operator` in a node.
  pub fn new(name: impl Into<String>, operator: O) -> Self {
    Self {
      name: name.into(),
      descriptor: operator.descriptor(),
      state: Mutex::new(PipeState {
        core: OperatorCore::new(),
        operator,
      }),
      metrics: NodeMetrics::new(),
      _payload: PhantomData,
    }
  }

  /// Sets whether heartbeats are forwarded.
  pub fn with_heartbeats(self, active: bool) -> Self {
    self.state.lock().core.heartbeats_active = active;
    self
  }

  /// Sets the predicate rate-limiting forwarded heartbeats.
  pub fn with_predicate(self, predicate: impl HeartbeatPredicate + 'static) -> Self {
    self.state.lock().core.predicate = Box::new(predicate);
    self
  }

  /// Applies heartbeat activation and policy from `config`.
  pub fn with_config(self, config: &HeartbeatConfig) -> Self {
    {
      let mut state = self.state.lock();
      state.core.heartbeats_active = config.activate_on_open;
      state.core.predicate = config.policy.build();
    }
    self
  }

  /// Runs `f` against the operator under the node's lock.
  pub fn inspect<R>(&self, f: impl FnOnce(&O) -> R) -> R {
    f(&self.state.lock().operator)
  }

  /// Runs `f` against the core under the node's lock.
  pub fn inspect_core<R>(&self, f: impl FnOnce(&OperatorCore) -> R) -> R {
    f(&self.state.lock().core)
  }

  fn enter_fault(&self, ctx: &Context<'_, P>, core: &mut OperatorCore, violation: OrderingViolation) {
    warn!(graph = %ctx.graph().name(), node = %ctx.node_id(), name = %self.name, %violation, "node faulted");
    metrics::record_ordering_fault(ctx.graph().name(), ctx.node_id());
    core.fault = Some(violation);
    if !core.done_signaled {
      core.done_signaled = true;
      ctx.signal_done();
    }
  }

  fn finish(&self, ctx: &Context<'_, P>, core: &mut OperatorCore, operator: &mut O) {
    if core.done_signaled {
      return;
    }
    let mut emitter = Emitter::new(ctx, core);
    if let Err(error) = operator.on_all_done(&mut emitter) {
      warn!(node = %ctx.node_id(), name = %self.name, %error, "flush on completion failed");
    }
    core.done_signaled = true;
    debug!(graph = %ctx.graph().name(), node = %ctx.node_id(), name = %self.name, "operator done");
    ctx.signal_done();
  }

  /// Expiration and heartbeat forwarding after any event.
  fn progress(
    &self,
    ctx: &Context<'_, P>,
    core: &mut OperatorCore,
    operator: &mut O,
    done_requested: bool,
  ) -> Result<(), NodeError> {
    if done_requested || core.all_done() {
      self.finish(ctx, core, operator);
    } else if let Some(min) = core.min_timestamp() {
      let mut emitter = Emitter::new(ctx, core);
      let bound = operator.process_heartbeat(&mut emitter, min)?;
      if emitter.done_requested {
        self.finish(ctx, core, operator);
      } else if let Some(bound) = bound {
        if core.heartbeat_due(bound) {
          core.last_heartbeat = Some(bound);
          trace!("TemporalPipe::heartbeat(node={}, value={})", ctx.node_id(), bound);
          ctx.transfer_heartbeat(bound);
        }
      }
    }
    self.metrics.set_state(operator.state_size(), operator.memory_usage());
    Ok(())
  }
}

impl<P: Payload, O: Operator<P>> Node<P> for TemporalPipe<P, O> {
  fn name(&self) -> &str {
    &self.name
  }

  fn descriptor(&self) -> &'static OperatorDescriptor {
    self.descriptor
  }

  fn metrics(&self) -> &NodeMetrics {
    &self.metrics
  }

  fn open(&self, node: NodeId) -> Result<(), NodeError> {
    let mut state = self.state.lock();
    if state.core.closed {
      return Err(NodeError::Closed(node));
    }
    state.core.opened = true;
    trace!("TemporalPipe::open(node={}, name={})", node, self.name);
    Ok(())
  }

  fn close(&self) {
    let mut state = self.state.lock();
    if state.core.closed {
      return;
    }
    state.core.closed = true;
    state.operator.close();
    self.metrics.set_state(0, 0);
    debug!(name = %self.name, "operator closed");
  }

  fn is_open(&self) -> bool {
    let state = self.state.lock();
    state.core.opened && !state.core.closed
  }

  fn is_closed(&self) -> bool {
    self.state.lock().core.closed
  }

  fn fault(&self) -> Option<OrderingViolation> {
    self.state.lock().core.fault.clone()
  }

  fn as_source(&self) -> Option<&dyn Source<P>> {
    Some(self)
  }

  fn as_sink(&self) -> Option<&dyn Sink<P>> {
    Some(self)
  }

  fn as_heartbeat(&self) -> Option<&dyn HeartbeatCapable<P>> {
    Some(self)
  }
}

impl<P: Payload, O: Operator<P>> Source<P> for TemporalPipe<P, O> {
  fn accepts_subscriptions(&self) -> bool {
    self.state.lock().operator.accepts_subscriptions()
  }
}

impl<P: Payload, O: Operator<P>> Sink<P> for TemporalPipe<P, O> {
  fn process(
    &self,
    ctx: &Context<'_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    let node = ctx.node_id();
    let mut guard = self.state.lock();
    let PipeState { core, operator } = &mut *guard;
    core.ensure_live(node)?;
    if !core.opened {
      return Err(NodeError::NotOpen(node));
    }
    if core.done_signaled {
      trace!("TemporalPipe::process(node={}) after done, dropped", node);
      return Ok(());
    }
    if core.received_done(input) {
      warn!(node = %node, name = %self.name, input, "element after done on input, dropped");
      return Ok(());
    }
    self.metrics.record_in();
    metrics::record_items_in(ctx.graph().name(), node, 1);
    if let Err(error) = core.observe(node, input, element.start()) {
      if let NodeError::Ordering(violation) = &error {
        self.enter_fault(ctx, core, violation.clone());
      }
      return Err(error);
    }
    let mut emitter = Emitter::new(ctx, core);
    operator.process_object(&mut emitter, element, input)?;
    let done_requested = emitter.done_requested;
    self.progress(ctx, core, operator, done_requested)
  }

  fn done(&self, ctx: &Context<'_, P>, input: InputId) -> Result<(), NodeError> {
    let node = ctx.node_id();
    let mut guard = self.state.lock();
    let PipeState { core, operator } = &mut *guard;
    if core.closed || core.done_signaled {
      return Ok(());
    }
    if !core.mark_done(node, input)? {
      return Ok(());
    }
    debug!(graph = %ctx.graph().name(), node = %node, name = %self.name, input, "input done");
    let mut emitter = Emitter::new(ctx, core);
    operator.on_input_done(&mut emitter, input)?;
    let done_requested = emitter.done_requested;
    self.progress(ctx, core, operator, done_requested)
  }

  fn is_done(&self) -> bool {
    self.state.lock().core.done_signaled
  }

  fn received_done(&self, input: InputId) -> bool {
    self.state.lock().core.received_done(input)
  }

  fn add_input(&self, input: InputId) -> bool {
    let mut state = self.state.lock();
    if state.core.closed || !state.operator.accepts_input(input) {
      return false;
    }
    state.core.add_input(input)
  }

  fn remove_input(&self, input: InputId) {
    self.state.lock().core.remove_input(input);
  }
}

impl<P: Payload, O: Operator<P>> HeartbeatCapable<P> for TemporalPipe<P, O> {
  fn heartbeat(
    &self,
    ctx: &Context<'_, P>,
    timestamp: Timestamp,
    origin: HeartbeatOrigin,
  ) -> Result<(), NodeError> {
    let node = ctx.node_id();
    let mut guard = self.state.lock();
    let PipeState { core, operator } = &mut *guard;
    core.ensure_live(node)?;
    if !core.opened || core.done_signaled {
      return Ok(());
    }
    self.metrics.record_heartbeat_in();
    core.observe_heartbeat(node, timestamp, origin)?;
    self.progress(ctx, core, operator, false)
  }

  fn set_heartbeats_active(&self, active: bool) {
    self.state.lock().core.heartbeats_active = active;
  }

  fn heartbeats_active(&self) -> bool {
    self.state.lock().core.heartbeats_active
  }

  fn set_heartbeat_predicate(&self, predicate: Box<dyn HeartbeatPredicate>) {
    self.state.lock().core.predicate = predicate;
  }

  fn min_timestamp(&self) -> Option<Timestamp> {
    self.state.lock().core.min_timestamp()
  }

  fn last_heartbeat(&self) -> Option<Timestamp> {
    self.state.lock().core.last_heartbeat
  }
}
