//! Operator metadata: static per-kind descriptors and live per-node counters.
//!
//! Every operator kind declares an [`OperatorDescriptor`]: its name and the
//! [`MetaDataKey`]s it can provide, each with the keys it is derived from. The
//! descriptor is an immutable `static` owned by the operator's module and
//! handed out by reference, so there is no process-wide registry to populate.
//!
//! The measured side lives in [`NodeMetrics`], a block of atomic counters
//! owned by each node. [`Graph::metadata`](crate::graph::Graph::metadata)
//! combines both into a serializable [`MetaDataSnapshot`].

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A piece of metadata an operator can report.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MetaDataKey {
  /// Elements received.
  InputCount,
  /// Elements emitted.
  OutputCount,
  /// Heartbeats received.
  HeartbeatsIn,
  /// Heartbeats emitted.
  HeartbeatsOut,
  /// Output per input element.
  Selectivity,
  /// Number of downstream subscribers.
  NumberOfSinks,
  /// Elements currently held in operator state.
  StateSize,
  /// Estimated bytes held in operator state.
  MemoryUsage,
}

/// A provided key and the keys it is computed from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetaDataDependency {
  /// The provided key.
  pub key: MetaDataKey,
  /// Keys this one is derived from.
  pub requires: &'static [MetaDataKey],
}

impl MetaDataDependency {
  /// A key with no dependencies.
  pub const fn measured(key: MetaDataKey) -> Self {
    Self { key, requires: &[] }
  }

  /// A key derived from `requires`.
  pub const fn derived(key: MetaDataKey, requires: &'static [MetaDataKey]) -> Self {
    Self { key, requires }
  }
}

/// Immutable description of an operator kind.
#[derive(Debug, Eq, PartialEq)]
pub struct OperatorDescriptor {
  /// Operator kind, e.g. `"temporal-difference"`.
  pub kind: &'static str,
  /// Metadata this kind provides.
  pub provides: &'static [MetaDataDependency],
}

/// Metadata every node provides.
pub const BASE_METADATA: &[MetaDataDependency] = &[
  MetaDataDependency::measured(MetaDataKey::InputCount),
  MetaDataDependency::measured(MetaDataKey::OutputCount),
  MetaDataDependency::measured(MetaDataKey::HeartbeatsIn),
  MetaDataDependency::measured(MetaDataKey::HeartbeatsOut),
  MetaDataDependency::measured(MetaDataKey::NumberOfSinks),
  MetaDataDependency::derived(
    MetaDataKey::Selectivity,
    &[MetaDataKey::InputCount, MetaDataKey::OutputCount],
  ),
];

/// Metadata provided by operators that keep state in sweep areas.
pub const STATEFUL_METADATA: &[MetaDataDependency] = &[
  MetaDataDependency::measured(MetaDataKey::InputCount),
  MetaDataDependency::measured(MetaDataKey::OutputCount),
  MetaDataDependency::measured(MetaDataKey::HeartbeatsIn),
  MetaDataDependency::measured(MetaDataKey::HeartbeatsOut),
  MetaDataDependency::measured(MetaDataKey::NumberOfSinks),
  MetaDataDependency::derived(
    MetaDataKey::Selectivity,
    &[MetaDataKey::InputCount, MetaDataKey::OutputCount],
  ),
  MetaDataDependency::measured(MetaDataKey::StateSize),
  MetaDataDependency::derived(MetaDataKey::MemoryUsage, &[MetaDataKey::StateSize]),
];

impl OperatorDescriptor {
  /// Creates a descriptor.
  pub const fn new(kind: &'static str, provides: &'static [MetaDataDependency]) -> Self {
    Self { kind, provides }
  }

  /// Returns true if the kind provides `key`.
  pub fn provides(&self, key: MetaDataKey) -> bool {
    self.provides.iter().any(|dependency| dependency.key == key)
  }

  /// Direct dependencies of `key`, empty if the key is measured or unknown.
  pub fn dependencies(&self, key: MetaDataKey) -> &'static [MetaDataKey] {
    self
      .provides
      .iter()
      .find(|dependency| dependency.key == key)
      .map(|dependency| dependency.requires)
      .unwrap_or(&[])
  }

  /// All keys `key` transitively depends on, in discovery order.
  pub fn dependency_closure(&self, key: MetaDataKey) -> Vec<MetaDataKey> {
    let mut closure = Vec::new();
    let mut pending = vec![key];
    while let Some(next) = pending.pop() {
      for required in self.dependencies(next) {
        if !closure.contains(required) {
          closure.push(*required);
          pending.push(*required);
        }
      }
    }
    closure
  }
}

/// Atomic counters owned by a node.
#[derive(Debug, Default)]
pub struct NodeMetrics {
  elements_in: AtomicU64,
  elements_out: AtomicU64,
  heartbeats_in: AtomicU64,
  heartbeats_out: AtomicU64,
  state_size: AtomicUsize,
  memory_usage: AtomicUsize,
}

impl NodeMetrics {
  /// Creates zeroed counters.
  pub fn new() -> Self {
    Self::default()
  }

  /// Counts one received element.
  pub fn record_in(&self) {
    self.elements_in.fetch_add(1, Ordering::Relaxed);
  }

  /// Counts one emitted element.
  pub fn record_out(&self) {
    self.elements_out.fetch_add(1, Ordering::Relaxed);
  }

  /// Counts one received heartbeat.
  pub fn record_heartbeat_in(&self) {
    self.heartbeats_in.fetch_add(1, Ordering::Relaxed);
  }

  /// Counts one emitted heartbeat.
  pub fn record_heartbeat_out(&self) {
    self.heartbeats_out.fetch_add(1, Ordering::Relaxed);
  }

  /// Publishes the current state size and memory estimate.
  pub fn set_state(&self, elements: usize, bytes: usize) {
    self.state_size.store(elements, Ordering::Relaxed);
    self.memory_usage.store(bytes, Ordering::Relaxed);
  }

  /// Elements received so far.
  pub fn elements_in(&self) -> u64 {
    self.elements_in.load(Ordering::Relaxed)
  }

  /// Elements emitted so far.
  pub fn elements_out(&self) -> u64 {
    self.elements_out.load(Ordering::Relaxed)
  }

  /// Heartbeats received so far.
  pub fn heartbeats_in(&self) -> u64 {
    self.heartbeats_in.load(Ordering::Relaxed)
  }

  /// Heartbeats emitted so far.
  pub fn heartbeats_out(&self) -> u64 {
    self.heartbeats_out.load(Ordering::Relaxed)
  }

  /// Builds a snapshot restricted to what `descriptor` provides.
  pub fn snapshot(
    &self,
    node: NodeId,
    name: &str,
    descriptor: &OperatorDescriptor,
    number_of_sinks: usize,
  ) -> MetaDataSnapshot {
    let elements_in = self.elements_in();
    let elements_out = self.elements_out();
    let stateful = descriptor.provides(MetaDataKey::StateSize);
    MetaDataSnapshot {
      node,
      name: name.to_string(),
      kind: descriptor.kind.to_string(),
      elements_in,
      elements_out,
      heartbeats_in: self.heartbeats_in(),
      heartbeats_out: self.heartbeats_out(),
      number_of_sinks,
      selectivity: (elements_in > 0).then(|| elements_out as f64 / elements_in as f64),
      state_size: stateful.then(|| self.state_size.load(Ordering::Relaxed)),
      memory_usage: stateful.then(|| self.memory_usage.load(Ordering::Relaxed)),
    }
  }
}

/// Point-in-time metadata of one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaDataSnapshot {
  /// Node id.
  pub node: NodeId,
  /// Node name.
  pub name: String,
  /// Operator kind.
  pub kind: String,
  /// Elements received.
  pub elements_in: u64,
  /// Elements emitted.
  pub elements_out: u64,
  /// Heartbeats received.
  pub heartbeats_in: u64,
  /// Heartbeats emitted.
  pub heartbeats_out: u64,
  /// Downstream subscribers at snapshot time.
  pub number_of_sinks: usize,
  /// `elements_out / elements_in`, once anything was received.
  pub selectivity: Option<f64>,
  /// Elements held in state, for stateful kinds.
  pub state_size: Option<usize>,
  /// Estimated bytes held in state, for stateful kinds.
  pub memory_usage: Option<usize>,
}
