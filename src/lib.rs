//! # timeweave
//!
//! Continuous queries over temporal data streams.
//!
//! A query is a graph of nodes: sources produce [`TemporalObject`]s (a
//! payload plus the half-open interval during which it is valid), pipes
//! transform them, sinks consume them. Elements travel in non-decreasing
//! start order, and heartbeats carry a lower bound on every future start so
//! that stateful operators can expire state without waiting for the next
//! element.
//!
//! ## Key Pieces
//!
//! - **Graph**: node arena, subscriptions and the delivery [`Context`](graph::Context).
//! - **Heartbeats**: predicates, the [`HeartbeatGenerator`](heartbeat::HeartbeatGenerator)
//!   and the ordering verifier.
//! - **Sweep areas**: list, hash and heap backed state containers with
//!   counting and delegating decorators.
//! - **Operators**: difference, join, union, filter, window, sources, sinks.
//! - **Migration**: swap a running subplan for an equivalent one at a
//!   reference point without losing or duplicating results.
//! - **Executor**: drives sources on Tokio until the registered sinks finish.
//!
//! ## Quick Start
//!
//! ```rust
//! use timeweave::config::SweepAreaConfig;
//! use timeweave::graph::Graph;
//! use timeweave::operators::{self, CollectSink, CursorSource};
//! use timeweave::time::TemporalObject;
//! use std::sync::Arc;
//!
//! let graph: Graph<&str> = Graph::new("difference");
//! let left = graph.add_node(CursorSource::from_vec(
//!   "left",
//!   vec![TemporalObject::valid("x", 0, 10)?],
//! ));
//! let right = graph.add_node(CursorSource::from_vec(
//!   "right",
//!   vec![TemporalObject::valid("x", 5, 15)?],
//! ));
//! let minus = graph.add_node(operators::difference("minus", &SweepAreaConfig::default())?);
//! let out = Arc::new(CollectSink::<&str>::new("out"));
//! let out_id = graph.add_shared_node(out.clone());
//! graph.connect(left, minus, 0)?;
//! graph.connect(right, minus, 1)?;
//! graph.connect(minus, out_id, 0)?;
//! graph.open_all()?;
//! graph.drain_source(right)?;
//! graph.drain_source(left)?;
//! assert_eq!(out.elements(), vec![TemporalObject::valid("x", 0, 5)?]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]

/// Configuration loaded from JSON.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Tokio-driven query execution.
pub mod executor;
/// Operator graph, topology and delivery context.
pub mod graph;
/// Heartbeat predicates, generator and ordering verification.
pub mod heartbeat;
/// Operator descriptors and per-node counters.
pub mod metadata;
/// Process-wide metrics through the `metrics` facade.
pub mod metrics;
/// Live plan migration.
pub mod migration;
/// Node traits and identifiers.
pub mod node;
/// Temporal operators, sources and sinks.
pub mod operators;
/// Typed tuples and schemas.
pub mod record;
/// Sweep areas.
pub mod sweep_area;
/// Tracing setup.
pub mod telemetry;
/// Timestamps, intervals and temporal objects.
pub mod time;

pub use error::{GraphError, NodeError};
pub use graph::Graph;
pub use node::{InputId, NodeId};
pub use time::{TemporalObject, TimeInterval, Timestamp};

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod executor_test;
#[cfg(test)]
mod graph_test;
#[cfg(test)]
mod migration_test;
#[cfg(test)]
mod operators_test;
#[cfg(test)]
mod time_test;
