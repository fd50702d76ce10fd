//! Process-wide counters for timeweave graphs, recorded through the `metrics`
//! facade.
//!
//! Every function is a no-op until the application installs a recorder
//! (Prometheus exporter, statsd bridge, test recorder). Per-node figures that
//! operators need to read back themselves live in
//! [`NodeMetrics`](crate::metadata::NodeMetrics) instead.
//!
//! - **Throughput:** [`record_items_in`] / [`record_items_out`] feed
//!   `timeweave_items_in_total` and `timeweave_items_out_total`.
//! - **Punctuation:** [`record_heartbeat`] feeds `timeweave_heartbeats_total`.
//! - **Faults:** [`record_ordering_fault`] feeds
//!   `timeweave_ordering_faults_total`.
//! - **Migration:** [`record_migration`] feeds `timeweave_migrations_total`,
//!   labelled by phase (`started`, `completed`).

use crate::node::NodeId;
use metrics::counter;

/// Records elements received by a node.
pub fn record_items_in(graph_id: &str, node: NodeId, count: u64) {
  counter!(
    "timeweave_items_in_total",
    "graph_id" => graph_id.to_string(),
    "node_id" => node.to_string()
  )
  .increment(count);
}

/// Records elements emitted by a node.
pub fn record_items_out(graph_id: &str, node: NodeId, count: u64) {
  counter!(
    "timeweave_items_out_total",
    "graph_id" => graph_id.to_string(),
    "node_id" => node.to_string()
  )
  .increment(count);
}

/// Records a heartbeat forwarded by a node.
pub fn record_heartbeat(graph_id: &str, node: NodeId) {
  counter!(
    "timeweave_heartbeats_total",
    "graph_id" => graph_id.to_string(),
    "node_id" => node.to_string()
  )
  .increment(1);
}

/// Records a node faulting on an ordering violation.
pub fn record_ordering_fault(graph_id: &str, node: NodeId) {
  counter!(
    "timeweave_ordering_faults_total",
    "graph_id" => graph_id.to_string(),
    "node_id" => node.to_string()
  )
  .increment(1);
}

/// Records a plan migration phase.
pub fn record_migration(graph_id: &str, phase: &'static str) {
  counter!(
    "timeweave_migrations_total",
    "graph_id" => graph_id.to_string(),
    "phase" => phase
  )
  .increment(1);
}
