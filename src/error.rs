//! # Error Types
//!
//! Error taxonomy for timeweave graphs. Each family is its own `thiserror`
//! enum so callers can tell structural problems from data problems:
//!
//! - **[`GraphError`]**: topology errors (occupied slots, missing edges, closed
//!   nodes). Returned synchronously by the offending call; the graph is left
//!   unchanged.
//! - **[`OrderingViolation`]**: an element or heartbeat broke the
//!   non-decreasing timestamp contract. Non-recoverable for the node that
//!   detects it: the node faults, signals done downstream and rejects further
//!   input, while the rest of the graph keeps running.
//! - **[`NodeError`]**: anything a node reports while processing.
//! - **[`SweepAreaError`]**: invalid construction arguments (validated
//!   eagerly) and operations an implementor structurally does not support.
//! - **[`HeartbeatError`]**, **[`MigrationError`]**, **[`ExecutorError`]** and
//!   **[`ConfigError`]**: argument and setup errors of the respective
//!   subsystems.
//!
//! Nothing in the crate retries on error; retries are a driver concern.

use crate::node::{InputId, NodeId};
use crate::time::Timestamp;
use std::fmt;
use thiserror::Error;

/// An interval whose end does not lie after its start.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("invalid time interval [{start}, {end})")]
pub struct InvalidInterval {
  /// Requested start.
  pub start: Timestamp,
  /// Requested end.
  pub end: Timestamp,
}

/// Structural errors raised by connect, disconnect and lifecycle calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GraphError {
  /// The node id does not (or no longer) exist in the graph.
  #[error("{0} is not part of the graph")]
  UnknownNode(NodeId),
  /// The node cannot produce elements.
  #[error("{0} cannot act as a source")]
  NotASource(NodeId),
  /// The node cannot consume elements.
  #[error("{0} cannot act as a sink")]
  NotASink(NodeId),
  /// The input slot is bound to a different source.
  #[error("input {input} of {sink} is already bound to {bound}")]
  SlotOccupied {
    /// Sink owning the slot.
    sink: NodeId,
    /// Slot id.
    input: InputId,
    /// Source currently bound to the slot.
    bound: NodeId,
  },
  /// The exact subscription already exists.
  #[error("{source_node} is already subscribed to input {input} of {sink}")]
  DuplicateSubscription {
    /// Upstream node.
    source_node: NodeId,
    /// Downstream node.
    sink: NodeId,
    /// Slot id.
    input: InputId,
  },
  /// There is no such edge to remove.
  #[error("no edge from {source_node} to input {input} of {sink}")]
  NoSuchEdge {
    /// Upstream node.
    source_node: NodeId,
    /// Downstream node.
    sink: NodeId,
    /// Slot id.
    input: InputId,
  },
  /// One of the endpoints has been closed.
  #[error("{0} is closed")]
  NodeClosed(NodeId),
  /// The source currently refuses new subscribers.
  #[error("{0} refuses new subscriptions")]
  SubscriptionRefused(NodeId),
  /// The node does not process heartbeats.
  #[error("{0} does not accept heartbeats")]
  NotHeartbeatCapable(NodeId),
  /// The edge would close a cycle; delivery cascades require a DAG.
  #[error("connecting {source_node} to {sink} would create a cycle")]
  Cycle {
    /// Upstream node.
    source_node: NodeId,
    /// Downstream node.
    sink: NodeId,
  },
  /// The sink does not accept this input id.
  #[error("{sink} does not accept input {input}")]
  InputRejected {
    /// Downstream node.
    sink: NodeId,
    /// Rejected slot id.
    input: InputId,
  },
}

/// Which bound an ordering violation broke.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderingBound {
  /// The last heartbeat committed for the input (or node).
  LastHeartbeat,
  /// The latest timestamp previously recorded for the input.
  LatestTimestamp,
}

impl fmt::Display for OrderingBound {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OrderingBound::LastHeartbeat => f.write_str("last heartbeat"),
      OrderingBound::LatestTimestamp => f.write_str("latest timestamp"),
    }
  }
}

/// An element arrived below a timestamp bound already established for its
/// input.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("ordering violation at {node} input {input}: timestamp {timestamp} is below the {bound} {bound_value}")]
pub struct OrderingViolation {
  /// Node that detected the violation.
  pub node: NodeId,
  /// Input the element arrived on.
  pub input: InputId,
  /// Offending timestamp.
  pub timestamp: Timestamp,
  /// Which bound was broken.
  pub bound: OrderingBound,
  /// Value of the broken bound.
  pub bound_value: Timestamp,
}

/// Errors reported by a node while processing elements, heartbeats or done
/// signals.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NodeError {
  /// The node has been closed.
  #[error("{0} is closed")]
  Closed(NodeId),
  /// The node has not been opened yet.
  #[error("{0} has not been opened")]
  NotOpen(NodeId),
  /// The node detected an ordering violation earlier and no longer accepts
  /// input.
  #[error("{node} has faulted: {violation}")]
  Faulted {
    /// The faulted node.
    node: NodeId,
    /// The violation that faulted it.
    violation: OrderingViolation,
  },
  /// The element just delivered broke the ordering contract.
  #[error(transparent)]
  Ordering(#[from] OrderingViolation),
  /// Delivery on an input the node does not know about.
  #[error("input {input} is not bound at {node}")]
  UnknownInput {
    /// Receiving node.
    node: NodeId,
    /// Unknown slot id.
    input: InputId,
  },
  /// Sweep area failure inside a stateful operator.
  #[error(transparent)]
  SweepArea(#[from] SweepAreaError),
  /// Structural failure while resolving the node.
  #[error(transparent)]
  Graph(#[from] GraphError),
}

impl NodeError {
  /// Returns the ordering violation behind this error, if any.
  pub fn violation(&self) -> Option<&OrderingViolation> {
    match self {
      NodeError::Ordering(violation) => Some(violation),
      NodeError::Faulted { violation, .. } => Some(violation),
      _ => None,
    }
  }
}

/// Sweep area construction and contract errors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SweepAreaError {
  /// Construction parameters are inconsistent.
  #[error("invalid sweep area argument: {0}")]
  InvalidArgument(String),
  /// The implementor structurally cannot perform the operation.
  #[error("{operation} is not supported by {area}")]
  Unsupported {
    /// Implementor name.
    area: &'static str,
    /// Operation name.
    operation: &'static str,
  },
  /// The area has been closed.
  #[error("sweep area is closed")]
  Closed,
  /// A query or expiration named an input beyond the area's dimension.
  #[error("input {input} is outside the sweep area dimension {dimension}")]
  InputOutOfRange {
    /// Requested input index.
    input: usize,
    /// Number of inputs the area was built for.
    dimension: usize,
  },
}

/// Heartbeat generator registration errors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HeartbeatError {
  /// Delays must be positive.
  #[error("heartbeat delay must be positive")]
  ZeroDelay,
  /// The target is not part of the graph.
  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Errors raised when a plan migration is requested.
///
/// All of them are reported before any adapter is installed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MigrationError {
  /// The parallel argument lists differ in length.
  #[error("Inconsistent number of arguments: {0}")]
  DimensionMismatch(String),
  /// A source does not feed the old plan entry, or an old plan exit does not
  /// feed the sink.
  #[error("{source_node} is not connected to {sink}")]
  NotConnected {
    /// Upstream node.
    source_node: NodeId,
    /// Downstream node.
    sink: NodeId,
  },
  /// Structural failure while installing the adapters.
  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Errors raised by the query executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
  /// The sink has not been registered.
  #[error("query {0} is not registered")]
  UnknownQuery(NodeId),
  /// Starting a query needs a Tokio runtime.
  #[error("no Tokio runtime available to drive queries")]
  NoRuntime,
  /// Structural failure while opening or closing nodes.
  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Errors raised while loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The configuration text is not valid JSON for the schema.
  #[error("failed to parse configuration: {0}")]
  Parse(#[from] serde_json::Error),
  /// The configuration file could not be read.
  #[error("failed to read configuration: {0}")]
  Io(#[from] std::io::Error),
}
