//! # Migration Test Suite
//!
//! Request validation, adapter installation, the closer's rewiring and the
//! exactly-once output guarantee across the reference point.
//!
//! The fixture is `source -> old filter -> sink` with an unconnected
//! `new filter` waiting to take over.

use crate::error::{GraphError, MigrationError};
use crate::graph::Graph;
use crate::migration::MigrationPlan;
use crate::node::{NodeId, Sink};
use crate::operators::{self, CollectSink, CursorSource};
use crate::time::TemporalObject;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

struct Fixture {
  graph: Graph<u64>,
  source: NodeId,
  old_filter: NodeId,
  new_filter: NodeId,
  sink: NodeId,
  out: Arc<CollectSink<u64>>,
}

fn fixture(elements: Vec<TemporalObject<u64>>) -> Fixture {
  let graph: Graph<u64> = Graph::new("migration");
  let source = graph.add_node(CursorSource::from_vec("source", elements));
  let old_filter = graph.add_node(operators::filter("old", |_: &TemporalObject<u64>| true));
  let new_filter = graph.add_node(operators::filter("new", |_: &TemporalObject<u64>| true));
  let out = Arc::new(CollectSink::<u64>::new("out"));
  let sink = graph.add_shared_node(out.clone());
  graph.connect(source, old_filter, 0).unwrap();
  graph.connect(old_filter, sink, 0).unwrap();
  graph.open_all().unwrap();
  Fixture {
    graph,
    source,
    old_filter,
    new_filter,
    sink,
    out,
  }
}

fn points(range: std::ops::Range<u64>) -> Vec<TemporalObject<u64>> {
  range.map(|t| TemporalObject::point(t, t)).collect()
}

fn swap_filters(f: &Fixture, reference_point: u64) -> MigrationPlan {
  MigrationPlan::new(reference_point)
    .split(f.source, f.old_filter, f.new_filter)
    .union(f.sink, f.old_filter, f.new_filter)
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_mismatched_lists_are_rejected() {
  let f = fixture(points(0..3));
  let mut plan = MigrationPlan::new(1);
  plan.sources.push(f.source);
  plan.to_old_plan.push(f.old_filter);

  let error = plan.start(&f.graph, |_| {}).err();
  assert!(matches!(error, Some(MigrationError::DimensionMismatch(_))));
}

#[test]
fn test_missing_edges_are_rejected() {
  let f = fixture(points(0..3));
  let plan = MigrationPlan::new(1).split(f.source, f.new_filter, f.old_filter);
  assert_eq!(
    plan.start(&f.graph, |_| {}).err(),
    Some(MigrationError::NotConnected {
      source_node: f.source,
      sink: f.new_filter
    })
  );

  let plan = MigrationPlan::new(1).union(f.sink, f.new_filter, f.old_filter);
  assert_eq!(
    plan.start(&f.graph, |_| {}).err(),
    Some(MigrationError::NotConnected {
      source_node: f.new_filter,
      sink: f.sink
    })
  );
}

#[test]
fn test_bad_new_plan_nodes_are_rejected_before_installation() {
  let f = fixture(points(0..3));
  let other = f.graph.add_node(CursorSource::from_vec("other", points(0..1)));
  f.graph.connect(other, f.new_filter, 0).unwrap();
  let nodes_before = f.graph.len();

  assert_eq!(
    swap_filters(&f, 1).start(&f.graph, |_| {}).err(),
    Some(MigrationError::Graph(GraphError::SlotOccupied {
      sink: f.new_filter,
      input: 0,
      bound: other
    }))
  );
  assert_eq!(f.graph.len(), nodes_before);
  assert_eq!(f.graph.inputs(f.old_filter), vec![(0, f.source)]);

  f.graph.remove_node(f.new_filter).unwrap();
  assert_eq!(
    swap_filters(&f, 1).start(&f.graph, |_| {}).err(),
    Some(MigrationError::Graph(GraphError::UnknownNode(f.new_filter)))
  );
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_empty_plan_completes_immediately() {
  let graph: Graph<u64> = Graph::new("empty");
  let calls = Arc::new(AtomicUsize::new(0));
  let seen = Arc::clone(&calls);
  let handle = MigrationPlan::new(3)
    .start(&graph, move |_| {
      seen.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

  assert!(handle.is_complete());
  assert_eq!(handle.remaining(), 0);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  let report = handle.wait_timeout(Duration::ZERO).unwrap();
  assert_eq!(report.reference_point, 3);
  assert!(report.errors.is_empty());
}

#[test]
fn test_migration_switches_plans_without_loss_or_duplication() {
  let f = fixture(points(0..10));
  for _ in 0..3 {
    f.graph.step_source(f.source).unwrap();
  }

  let calls = Arc::new(AtomicUsize::new(0));
  let seen = Arc::clone(&calls);
  let handle = swap_filters(&f, 5)
    .start(&f.graph, move |_| {
      seen.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
  assert_eq!(handle.remaining(), 2);
  let (splits, unions) = (handle.splits(), handle.unions());
  assert_eq!((splits.len(), unions.len()), (1, 1));
  assert!(f.graph.node(f.new_filter).unwrap().is_open());
  assert_eq!(f.graph.inputs(f.old_filter), vec![(0, splits[0])]);
  assert_eq!(f.graph.inputs(f.sink), vec![(0, unions[0])]);

  // 3, 4 and 5; the element at the reference point finishes the old plan.
  for _ in 0..3 {
    f.graph.step_source(f.source).unwrap();
  }
  let report = handle.wait_timeout(WAIT).unwrap();
  assert!(report.errors.is_empty(), "{:?}", report.errors);
  assert_eq!(report.splits, splits);
  assert_eq!(report.unions, unions);
  assert_eq!(report.closed, vec![f.old_filter]);
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  assert!(!f.graph.contains(splits[0]));
  assert!(!f.graph.contains(unions[0]));
  assert!(f.graph.node(f.old_filter).unwrap().is_closed());
  assert_eq!(f.graph.inputs(f.new_filter), vec![(0, f.source)]);
  assert_eq!(f.graph.inputs(f.sink), vec![(0, f.new_filter)]);

  f.graph.drain_source(f.source).unwrap();
  assert_eq!(f.out.payloads(), (0..10).collect::<Vec<u64>>());
  assert!(f.out.is_done());
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_elements_straddling_the_reference_point_arrive_once() {
  let elements = vec![
    TemporalObject::valid(1, 3, 8).unwrap(),
    TemporalObject::valid(2, 6, 7).unwrap(),
    TemporalObject::valid(3, 9, 12).unwrap(),
  ];
  let f = fixture(elements.clone());
  let handle = swap_filters(&f, 5).start(&f.graph, |_| {}).unwrap();

  f.graph.step_source(f.source).unwrap();
  f.graph.step_source(f.source).unwrap();
  handle.wait_timeout(WAIT).unwrap();
  f.graph.drain_source(f.source).unwrap();

  assert_eq!(f.out.elements(), elements);
  assert!(f.out.is_done());
}
