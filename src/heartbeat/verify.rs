//! Ordering verification harness.

use crate::error::{NodeError, OrderingBound, OrderingViolation};
use crate::graph::Context;
use crate::heartbeat::HeartbeatPredicate;
use crate::metadata::{NodeMetrics, OperatorDescriptor};
use crate::metrics;
use crate::node::{HeartbeatCapable, HeartbeatOrigin, InputId, Node, NodeId, Sink};
use crate::time::{Payload, TemporalObject, Timestamp};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
struct VerifierState {
  node: Option<NodeId>,
  latest: BTreeMap<InputId, Timestamp>,
  signaled: BTreeMap<InputId, Timestamp>,
  last_heartbeat: Option<Timestamp>,
  fault: Option<OrderingViolation>,
}

/// Wraps a sink and checks that every element it receives starts no earlier
/// than the last heartbeat and the previous element on the same input.
///
/// Heartbeats are tracked per input. The verifier's own last heartbeat is the
/// minimum over its inputs, so a heartbeat on one input never bounds another.
/// Memory-manager heartbeats are forwarded unchecked and raise no bound.
///
/// The first violation faults the verifier: it returns
/// [`NodeError::Ordering`], completes the wrapped sink on every input and
/// rejects everything afterwards with [`NodeError::Faulted`]. The rest of the
/// graph is unaffected.
///
/// The verifier takes the wrapped node's place in the graph; the wrapped node
/// sees the same [`Context`] and therefore the verifier's subscribers.
pub struct OrderingVerifier<P: Payload> {
  inner: Arc<dyn Node<P>>,
  state: Mutex<VerifierState>,
}

/// Wraps `inner` in an [`OrderingVerifier`].
pub fn verify_heartbeat_ordering<P: Payload>(inner: Arc<dyn Node<P>>) -> OrderingVerifier<P> {
  OrderingVerifier::new(inner)
}

impl<P: Payload> OrderingVerifier<P> {
  /// Creates a verifier around `inner`.
  pub fn new(inner: Arc<dyn Node<P>>) -> Self {
    Self {
      inner,
      state: Mutex::new(VerifierState::default()),
    }
  }

  /// The wrapped node.
  pub fn inner(&self) -> &Arc<dyn Node<P>> {
    &self.inner
  }

  fn check(&self, state: &VerifierState, node: NodeId, input: InputId, timestamp: Timestamp) -> Option<OrderingViolation> {
    if let Some(signaled) = state.signaled.get(&input).copied().filter(|signaled| timestamp < *signaled) {
      return Some(OrderingViolation {
        node,
        input,
        timestamp,
        bound: OrderingBound::LastHeartbeat,
        bound_value: signaled,
      });
    }
    state
      .latest
      .get(&input)
      .copied()
      .filter(|latest| timestamp < *latest)
      .map(|latest| OrderingViolation {
        node,
        input,
        timestamp,
        bound: OrderingBound::LatestTimestamp,
        bound_value: latest,
      })
  }

  fn fault(&self, ctx: &Context<'_, P>, violation: OrderingViolation) -> NodeError {
    let inputs: Vec<InputId> = {
      let mut state = self.state.lock();
      state.fault = Some(violation.clone());
      state.latest.keys().copied().collect()
    };
    warn!(graph = %ctx.graph().name(), node = %violation.node, %violation, "ordering violation detected");
    metrics::record_ordering_fault(ctx.graph().name(), violation.node);
    if let Some(sink) = self.inner.as_sink() {
      for input in inputs {
        if let Err(error) = sink.done(ctx, input) {
          warn!(node = %violation.node, input, %error, "completing wrapped sink failed");
        }
      }
    }
    NodeError::Ordering(violation)
  }
}

impl<P: Payload> Node<P> for OrderingVerifier<P> {
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn descriptor(&self) -> &'static OperatorDescriptor {
    self.inner.descriptor()
  }

  fn metrics(&self) -> &NodeMetrics {
    self.inner.metrics()
  }

  fn open(&self, node: NodeId) -> Result<(), NodeError> {
    self.state.lock().node = Some(node);
    self.inner.open(node)
  }

  fn close(&self) {
    self.inner.close();
  }

  fn is_open(&self) -> bool {
    self.inner.is_open()
  }

  fn is_closed(&self) -> bool {
    self.inner.is_closed()
  }

  fn fault(&self) -> Option<OrderingViolation> {
    self.state.lock().fault.clone().or_else(|| self.inner.fault())
  }

  fn as_sink(&self) -> Option<&dyn Sink<P>> {
    Some(self)
  }

  fn as_heartbeat(&self) -> Option<&dyn HeartbeatCapable<P>> {
    Some(self)
  }
}

impl<P: Payload> Sink<P> for OrderingVerifier<P> {
  fn process(
    &self,
    ctx: &Context<'_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    let node = ctx.node_id();
    let violation = {
      let mut state = self.state.lock();
      if let Some(violation) = &state.fault {
        return Err(NodeError::Faulted {
          node,
          violation: violation.clone(),
        });
      }
      let violation = self.check(&state, node, input, element.start());
      if violation.is_none() {
        state.latest.insert(input, element.start());
      }
      violation
    };
    if let Some(violation) = violation {
      return Err(self.fault(ctx, violation));
    }
    match self.inner.as_sink() {
      Some(sink) => sink.process(ctx, element, input),
      None => Ok(()),
    }
  }

  fn done(&self, ctx: &Context<'_, P>, input: InputId) -> Result<(), NodeError> {
    if self.state.lock().fault.is_some() {
      return Ok(());
    }
    match self.inner.as_sink() {
      Some(sink) => sink.done(ctx, input),
      None => Ok(()),
    }
  }

  fn is_done(&self) -> bool {
    self.inner.as_sink().is_some_and(|sink| sink.is_done())
  }

  fn received_done(&self, input: InputId) -> bool {
    self.inner.as_sink().is_some_and(|sink| sink.received_done(input))
  }

  fn add_input(&self, input: InputId) -> bool {
    let accepted = self.inner.as_sink().is_some_and(|sink| sink.add_input(input));
    if accepted {
      self.state.lock().latest.entry(input).or_insert(0);
    }
    accepted
  }

  fn remove_input(&self, input: InputId) {
    {
      let mut state = self.state.lock();
      state.latest.remove(&input);
      state.signaled.remove(&input);
    }
    if let Some(sink) = self.inner.as_sink() {
      sink.remove_input(input);
    }
  }
}

impl<P: Payload> HeartbeatCapable<P> for OrderingVerifier<P> {
  fn heartbeat(
    &self,
    ctx: &Context<'_, P>,
    timestamp: Timestamp,
    origin: HeartbeatOrigin,
  ) -> Result<(), NodeError> {
    {
      let mut state = self.state.lock();
      if let Some(violation) = &state.fault {
        return Err(NodeError::Faulted {
          node: ctx.node_id(),
          violation: violation.clone(),
        });
      }
      if let HeartbeatOrigin::Input(input) = origin {
        let signaled = state.signaled.entry(input).or_insert(timestamp);
        *signaled = (*signaled).max(timestamp);
        let latest = state.latest.entry(input).or_insert(timestamp);
        *latest = (*latest).max(timestamp);
        let minimum = state.latest.values().copied().min();
        if let Some(minimum) = minimum.filter(|minimum| state.last_heartbeat.is_none_or(|last| *minimum > last)) {
          state.last_heartbeat = Some(minimum);
        }
      }
    }
    match self.inner.as_heartbeat() {
      Some(inner) => inner.heartbeat(ctx, timestamp, origin),
      None => Ok(()),
    }
  }

  fn set_heartbeats_active(&self, active: bool) {
    if let Some(inner) = self.inner.as_heartbeat() {
      inner.set_heartbeats_active(active);
    }
  }

  fn heartbeats_active(&self) -> bool {
    self.inner.as_heartbeat().is_some_and(|inner| inner.heartbeats_active())
  }

  fn set_heartbeat_predicate(&self, predicate: Box<dyn HeartbeatPredicate>) {
    if let Some(inner) = self.inner.as_heartbeat() {
      inner.set_heartbeat_predicate(predicate);
    }
  }

  fn min_timestamp(&self) -> Option<Timestamp> {
    match self.inner.as_heartbeat() {
      Some(inner) => inner.min_timestamp(),
      None => self.state.lock().latest.values().copied().min(),
    }
  }

  fn last_heartbeat(&self) -> Option<Timestamp> {
    self.state.lock().last_heartbeat
  }
}
