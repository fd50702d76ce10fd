//! # Graph Test Suite
//!
//! Subscription protocol, lifecycle and delivery through the [`Graph`].
//!
//! ## Test Coverage
//!
//! - **Subscriptions**: connect/disconnect validation, duplicates, occupied
//!   slots, cycles, refusal and closed endpoints
//! - **Lifecycle**: open, close, remove and their effect on delivery
//! - **Delivery**: elements, done signals and heartbeats through pipes
//! - **Traversals**: upstream/downstream walks and heartbeat activation

use crate::error::{GraphError, NodeError};
use crate::graph::{Graph, Subscription};
use crate::heartbeat::EveryNth;
use crate::node::{HeartbeatOrigin, Sink, SourceStep};
use crate::operators::{self, CollectSink, CursorSource};
use crate::time::TemporalObject;
use std::sync::Arc;

fn points(values: &[u64]) -> Vec<TemporalObject<u64>> {
  values.iter().map(|t| TemporalObject::point(*t, *t)).collect()
}

fn pass_all(name: &str) -> operators::TemporalPipe<u64, operators::TemporalFilter<u64>> {
  operators::filter(name, |_: &TemporalObject<u64>| true)
}

// ============================================================================
// Subscriptions
// ============================================================================

#[test]
fn test_connect_binds_both_directions() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));

  graph.connect(source, sink, 3).unwrap();
  assert_eq!(graph.subscriptions(source), vec![Subscription { sink, input: 3 }]);
  assert_eq!(graph.inputs(sink), vec![(3, source)]);
  assert_eq!(graph.len(), 2);
}

#[test]
fn test_duplicate_subscription_is_rejected_and_leaves_topology_alone() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));
  graph.connect(source, sink, 0).unwrap();

  assert_eq!(
    graph.connect(source, sink, 0),
    Err(GraphError::DuplicateSubscription {
      source_node: source,
      sink,
      input: 0
    })
  );
  assert_eq!(graph.subscriptions(source).len(), 1);
}

#[test]
fn test_occupied_slot_is_rejected() {
  let graph: Graph<u64> = Graph::new("g");
  let first = graph.add_node(CursorSource::from_vec("a", points(&[1])));
  let second = graph.add_node(CursorSource::from_vec("b", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));
  graph.connect(first, sink, 0).unwrap();

  assert_eq!(
    graph.connect(second, sink, 0),
    Err(GraphError::SlotOccupied {
      sink,
      input: 0,
      bound: first
    })
  );
  graph.connect(second, sink, 1).unwrap();
}

#[test]
fn test_cycles_are_rejected() {
  let graph: Graph<u64> = Graph::new("g");
  let a = graph.add_node(pass_all("a"));
  let b = graph.add_node(pass_all("b"));
  graph.connect(a, b, 0).unwrap();

  assert_eq!(
    graph.connect(b, a, 0),
    Err(GraphError::Cycle {
      source_node: b,
      sink: a
    })
  );
  assert_eq!(graph.connect(a, a, 0), Err(GraphError::InputRejected { sink: a, input: 0 }));
}

#[test]
fn test_wrong_kinds_and_unknown_nodes() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));
  let other = graph.add_node(CollectSink::new("d"));

  assert_eq!(graph.connect(sink, other, 0), Err(GraphError::NotASource(sink)));
  assert_eq!(graph.connect(source, source, 0), Err(GraphError::NotASink(source)));

  let missing = graph.remove_node(other).map(|_| other).unwrap();
  assert_eq!(graph.connect(source, missing, 0), Err(GraphError::UnknownNode(missing)));
}

#[test]
fn test_filter_rejects_second_input() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let filter = graph.add_node(pass_all("f"));
  assert_eq!(
    graph.connect(source, filter, 1),
    Err(GraphError::InputRejected { sink: filter, input: 1 })
  );
}

#[test]
fn test_disconnect_requires_the_exact_edge() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));
  graph.connect(source, sink, 0).unwrap();

  assert!(matches!(graph.disconnect(source, sink, 1), Err(GraphError::NoSuchEdge { .. })));
  graph.disconnect(source, sink, 0).unwrap();
  assert!(graph.subscriptions(source).is_empty());
  assert!(graph.inputs(sink).is_empty());
  graph.connect(source, sink, 0).unwrap();
}

#[test]
fn test_closed_nodes_cannot_be_connected() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));
  graph.close(sink).unwrap();
  assert_eq!(graph.connect(source, sink, 0), Err(GraphError::NodeClosed(sink)));
}

// ============================================================================
// Lifecycle and delivery
// ============================================================================

#[test]
fn test_source_must_be_opened_before_stepping() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1])));
  let sink = graph.add_node(CollectSink::new("c"));
  graph.connect(source, sink, 0).unwrap();

  assert!(matches!(graph.step_source(source), Err(NodeError::NotOpen(_))));
  graph.open_all().unwrap();
  assert_eq!(graph.step_source(source).unwrap(), SourceStep::Emitted);
  assert_eq!(graph.step_source(source).unwrap(), SourceStep::Exhausted);
  assert_eq!(graph.step_source(source).unwrap(), SourceStep::Exhausted);
  assert!(graph.is_done(sink));
}

#[test]
fn test_pipe_rejects_elements_before_open() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[])));
  let filter = graph.add_node(pass_all("f"));
  graph.connect(source, filter, 0).unwrap();

  assert!(matches!(
    graph.process(filter, TemporalObject::point(1, 1), 0),
    Err(NodeError::NotOpen(_))
  ));
}

#[test]
fn test_elements_and_done_flow_through_a_chain() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1, 2, 3, 4])));
  let even = graph.add_node(operators::filter("even", |o: &TemporalObject<u64>| o.payload() % 2 == 0));
  let sink = Arc::new(CollectSink::<u64>::new("c"));
  let sink_id = graph.add_shared_node(sink.clone());
  graph.connect(source, even, 0).unwrap();
  graph.connect(even, sink_id, 0).unwrap();
  graph.open_all().unwrap();

  assert_eq!(graph.drain_source(source).unwrap(), 4);
  assert_eq!(sink.payloads(), vec![2, 4]);
  assert!(graph.is_done(even));
  assert!(sink.is_done());

  let metadata = graph.metadata(even).unwrap();
  assert_eq!(metadata.elements_in, 4);
  assert_eq!(metadata.elements_out, 2);
  assert_eq!(metadata.number_of_sinks, 1);
}

#[test]
fn test_fan_out_delivers_to_every_subscriber() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1, 2])));
  let left = Arc::new(CollectSink::<u64>::new("l"));
  let right = Arc::new(CollectSink::<u64>::new("r"));
  let left_id = graph.add_shared_node(left.clone());
  let right_id = graph.add_shared_node(right.clone());
  graph.connect(source, left_id, 0).unwrap();
  graph.connect(source, right_id, 0).unwrap();
  graph.open_all().unwrap();
  graph.drain_source(source).unwrap();

  assert_eq!(left.payloads(), vec![1, 2]);
  assert_eq!(right.payloads(), vec![1, 2]);
}

#[test]
fn test_close_unsubscribes_and_stops_delivery() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1, 2, 3])));
  let filter = graph.add_node(pass_all("f"));
  let sink = Arc::new(CollectSink::<u64>::new("c"));
  let sink_id = graph.add_shared_node(sink.clone());
  graph.connect(source, filter, 0).unwrap();
  graph.connect(filter, sink_id, 0).unwrap();
  graph.open_all().unwrap();

  graph.step_source(source).unwrap();
  graph.close(filter).unwrap();
  graph.drain_source(source).unwrap();

  assert_eq!(sink.payloads(), vec![1]);
  assert!(graph.subscriptions(source).is_empty());
  assert!(graph.node(filter).unwrap().is_closed());
  assert!(matches!(graph.open(filter), Err(NodeError::Closed(_))));
}

#[test]
fn test_remove_node_drops_it_from_the_arena() {
  let graph: Graph<u64> = Graph::new("g");
  let a = graph.add_node(pass_all("a"));
  let b = graph.add_node(pass_all("b"));
  graph.connect(a, b, 0).unwrap();

  let removed = graph.remove_node(a).unwrap();
  assert!(removed.is_closed());
  assert!(!graph.contains(a));
  assert!(graph.inputs(b).is_empty());
  assert_eq!(graph.node_ids(), vec![b]);
  assert_eq!(graph.remove_node(a).err(), Some(GraphError::UnknownNode(a)));
}

#[test]
fn test_upstream_and_downstream_walks() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[])));
  let a = graph.add_node(pass_all("a"));
  let b = graph.add_node(pass_all("b"));
  let sink = graph.add_node(CollectSink::new("c"));
  graph.connect(source, a, 0).unwrap();
  graph.connect(a, b, 0).unwrap();
  graph.connect(b, sink, 0).unwrap();

  assert_eq!(graph.downstream(&[a]), vec![a, b, sink]);
  assert_eq!(graph.upstream(&[b]), vec![b, a, source]);
}

// ============================================================================
// Heartbeats
// ============================================================================

#[test]
fn test_heartbeats_flow_only_while_active() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[1, 3, 5])).with_heartbeats(true));
  let filter = graph.add_node(pass_all("f"));
  let sink = Arc::new(CollectSink::<u64>::new("c"));
  let sink_id = graph.add_shared_node(sink.clone());
  graph.connect(source, filter, 0).unwrap();
  graph.connect(filter, sink_id, 0).unwrap();
  graph.open_all().unwrap();

  graph.step_source(source).unwrap();
  assert!(sink.heartbeats().is_empty());
  // The inactive filter still observed the source's heartbeat.
  assert_eq!(graph.min_timestamp(filter), Some(3));

  graph.set_heartbeats_active_top_down(&[sink_id], true);
  graph.drain_source(source).unwrap();
  assert_eq!(sink.heartbeats(), vec![3, 5]);
  assert_eq!(sink.payloads(), vec![1, 3, 5]);
}

#[test]
fn test_heartbeat_predicate_rate_limits_forwarding() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[])));
  let filter = graph.add_node(pass_all("f").with_heartbeats(true));
  let sink = Arc::new(CollectSink::<u64>::new("c"));
  let sink_id = graph.add_shared_node(sink.clone());
  graph.connect(source, filter, 0).unwrap();
  graph.connect(filter, sink_id, 0).unwrap();
  graph.open_all().unwrap();
  graph.set_heartbeat_predicate_bottom_up(&[source], || Box::new(EveryNth::new(2)));

  for t in 1..=6 {
    graph.heartbeat(filter, t, HeartbeatOrigin::Input(0)).unwrap();
  }
  assert_eq!(sink.heartbeats(), vec![2, 4, 6]);
}

#[test]
fn test_heartbeat_on_unbound_input_fails() {
  let graph: Graph<u64> = Graph::new("g");
  let filter = graph.add_node(pass_all("f"));
  graph.open_all().unwrap();
  assert!(matches!(
    graph.heartbeat(filter, 1, HeartbeatOrigin::Input(0)),
    Err(NodeError::UnknownInput { input: 0, .. })
  ));
}

#[test]
fn test_element_behind_heartbeat_faults_the_node() {
  let graph: Graph<u64> = Graph::new("g");
  let source = graph.add_node(CursorSource::from_vec("s", points(&[])));
  let filter = graph.add_node(pass_all("f"));
  let sink = Arc::new(CollectSink::<u64>::new("c"));
  let sink_id = graph.add_shared_node(sink.clone());
  graph.connect(source, filter, 0).unwrap();
  graph.connect(filter, sink_id, 0).unwrap();
  graph.open_all().unwrap();

  graph.heartbeat(filter, 10, HeartbeatOrigin::Input(0)).unwrap();
  let error = graph.process(filter, TemporalObject::point(4, 4), 0).unwrap_err();
  assert!(matches!(error, NodeError::Ordering(_)));
  assert_eq!(graph.fault(filter).map(|violation| violation.bound_value), Some(10));
  assert!(sink.is_done());
  assert!(matches!(
    graph.process(filter, TemporalObject::point(11, 11), 0),
    Err(NodeError::Faulted { .. })
  ));
}
