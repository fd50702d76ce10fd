//! # Node Traits
//!
//! Roles a graph node can play, exposed as capability views instead of a
//! class hierarchy:
//!
//! - [`Node`]: identity, lifecycle and metadata. Every node implements it.
//! - [`Source`]: can be subscribed to by sinks. Returned by [`Node::as_source`].
//! - [`Sink`]: consumes elements and done signals on numbered inputs.
//!   Returned by [`Node::as_sink`].
//! - [`HeartbeatCapable`]: accepts heartbeats and exposes its timestamp
//!   state. Returned by [`Node::as_heartbeat`].
//!
//! A pipe is simply a node that returns `Some` from both `as_source` and
//! `as_sink`. Graph traversals (heartbeat activation, query start-up) walk the
//! topology by these views, never by type tests.
//!
//! ## Calling convention
//!
//! Nodes never hold a reference to their graph. Every data-path call receives
//! a [`Context`] that borrows the graph's topology for the duration of the
//! synchronous delivery cascade and names the node being called; outputs are
//! pushed through it.

use crate::error::{NodeError, OrderingViolation};
use crate::graph::Context;
use crate::heartbeat::HeartbeatPredicate;
use crate::metadata::{NodeMetrics, OperatorDescriptor};
use crate::time::{Payload, TemporalObject, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a node inside its graph.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
  /// Returns the arena index of this node.
  #[inline]
  pub const fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "node#{}", self.0)
  }
}

/// Identifier of an input slot, unique among one sink's inputs.
pub type InputId = u32;

/// Where a heartbeat comes from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum HeartbeatOrigin {
  /// From the source bound to the given input: no future element on that input
  /// starts earlier than the heartbeat.
  Input(InputId),
  /// From a memory manager: raises every input and forces expiration. Such
  /// heartbeats trade exactness for memory and are exempt from the per-input
  /// ordering check.
  MemoryManager,
}

/// Outcome of a single source step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceStep {
  /// One element was pushed downstream.
  Emitted,
  /// Nothing available right now.
  Idle,
  /// The source has no more elements and has signaled done.
  Exhausted,
}

/// Identity, lifecycle and capability views of a graph node.
pub trait Node<P: Payload>: Send + Sync {
  /// Human-readable name used in logs and metadata.
  fn name(&self) -> &str;

  /// Static description of the operator kind.
  fn descriptor(&self) -> &'static OperatorDescriptor;

  /// Live counters of this node.
  fn metrics(&self) -> &NodeMetrics;

  /// Transitions the node to accepting elements.
  ///
  /// # Errors
  ///
  /// Returns [`NodeError::Closed`] if the node has been closed. `node` is the
  /// id the graph knows the node by.
  fn open(&self, node: NodeId) -> Result<(), NodeError>;

  /// Tears the node down and releases its state. Idempotent.
  fn close(&self);

  /// Returns true once [`open`](Node::open) succeeded.
  fn is_open(&self) -> bool;

  /// Returns true once [`close`](Node::close) has been called.
  fn is_closed(&self) -> bool;

  /// The ordering violation that faulted this node, if any.
  fn fault(&self) -> Option<OrderingViolation> {
    None
  }

  /// Producer view.
  fn as_source(&self) -> Option<&dyn Source<P>> {
    None
  }

  /// Consumer view.
  fn as_sink(&self) -> Option<&dyn Sink<P>> {
    None
  }

  /// Heartbeat view.
  fn as_heartbeat(&self) -> Option<&dyn HeartbeatCapable<P>> {
    None
  }
}

/// A node that sinks can subscribe to.
pub trait Source<P: Payload>: Send + Sync {
  /// Returns false while the source refuses new subscribers.
  fn accepts_subscriptions(&self) -> bool {
    true
  }

  /// Returns true if the source produces elements on its own when stepped
  /// (as opposed to a pipe, which only forwards).
  fn is_steppable(&self) -> bool {
    false
  }

  /// Produces at most one element.
  ///
  /// # Errors
  ///
  /// Returns [`NodeError::NotOpen`] or [`NodeError::Closed`] outside the
  /// node's active lifetime.
  fn step(&self, _ctx: &Context<'_, P>) -> Result<SourceStep, NodeError> {
    Ok(SourceStep::Exhausted)
  }
}

/// A node that consumes elements on numbered inputs.
pub trait Sink<P: Payload>: Send + Sync {
  /// Consumes `element` arriving on `input`.
  ///
  /// # Errors
  ///
  /// Returns an error when the node is closed or faulted, when `input` is not
  /// bound, or when the element violates the ordering contract.
  fn process(
    &self,
    ctx: &Context<'_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError>;

  /// Records that `input` will deliver nothing more. Idempotent.
  ///
  /// # Errors
  ///
  /// Returns [`NodeError::UnknownInput`] if `input` is not bound.
  fn done(&self, ctx: &Context<'_, P>, input: InputId) -> Result<(), NodeError>;

  /// Returns true once the node has completed.
  fn is_done(&self) -> bool;

  /// Returns true if `input` has signaled done.
  fn received_done(&self, input: InputId) -> bool;

  /// Called by the graph (under its write lock) when `input` gets bound.
  /// Returns false to reject the input id.
  fn add_input(&self, input: InputId) -> bool;

  /// Called by the graph (under its write lock) when `input` gets unbound.
  fn remove_input(&self, input: InputId);
}

/// A node that accepts heartbeats and tracks timestamp bounds.
pub trait HeartbeatCapable<P: Payload>: Send + Sync {
  /// Delivers a heartbeat.
  ///
  /// The node always records the new bound and expires state accordingly;
  /// forwarding downstream only happens while heartbeats are active. Ignored
  /// before the node is opened.
  ///
  /// # Errors
  ///
  /// Returns an error when the node is closed or faulted, or when the origin
  /// names an unbound input.
  fn heartbeat(
    &self,
    ctx: &Context<'_, P>,
    timestamp: Timestamp,
    origin: HeartbeatOrigin,
  ) -> Result<(), NodeError>;

  /// Enables or disables heartbeat processing and forwarding.
  fn set_heartbeats_active(&self, active: bool);

  /// Returns true if heartbeats are processed.
  fn heartbeats_active(&self) -> bool;

  /// Replaces the predicate that rate-limits outgoing heartbeats.
  fn set_heartbeat_predicate(&self, predicate: Box<dyn HeartbeatPredicate>);

  /// Current lower bound on future input timestamps, if every input has
  /// established one.
  fn min_timestamp(&self) -> Option<Timestamp>;

  /// Last heartbeat value committed downstream.
  fn last_heartbeat(&self) -> Option<Timestamp>;
}
