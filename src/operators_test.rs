//! # Operators Test Suite
//!
//! End-to-end behavior of the temporal operators inside a graph: sources feed
//! the operator under test, a [`CollectSink`] records what comes out.

use crate::config::SweepAreaConfig;
use crate::graph::Graph;
use crate::node::{NodeId, Sink};
use crate::operators::{
  self, CollectSink, CursorSource, TemporalJoin, TemporalMapper, TemporalPipe, TemporalWindow,
  WindowKind,
};
use crate::time::{TemporalObject, TimeInterval};
use std::sync::Arc;

fn obj<P>(payload: P, start: u64, end: u64) -> TemporalObject<P> {
  TemporalObject::valid(payload, start, end).unwrap()
}

fn points(values: &[u64]) -> Vec<TemporalObject<u64>> {
  values.iter().map(|t| TemporalObject::point(*t, *t)).collect()
}

fn intervals<P>(elements: &[TemporalObject<P>]) -> Vec<(u64, u64)> {
  elements.iter().map(|e| (e.start(), e.end())).collect()
}

struct Binary<P: crate::time::Payload> {
  graph: Graph<P>,
  left: NodeId,
  right: NodeId,
  operator: NodeId,
  out: Arc<CollectSink<P>>,
}

fn binary<P: crate::time::Payload>(
  operator: impl crate::node::Node<P> + 'static,
  left: Vec<TemporalObject<P>>,
  right: Vec<TemporalObject<P>>,
) -> Binary<P> {
  let graph: Graph<P> = Graph::new("operators");
  let left = graph.add_node(CursorSource::from_vec("left", left));
  let right = graph.add_node(CursorSource::from_vec("right", right));
  let operator = graph.add_node(operator);
  let out = Arc::new(CollectSink::<P>::new("out"));
  let out_id = graph.add_shared_node(out.clone());
  graph.connect(left, operator, 0).unwrap();
  graph.connect(right, operator, 1).unwrap();
  graph.connect(operator, out_id, 0).unwrap();
  graph.open_all().unwrap();
  Binary {
    graph,
    left,
    right,
    operator,
    out,
  }
}

// ============================================================================
// Difference
// ============================================================================

fn difference<P: crate::time::Payload>(
  left: Vec<TemporalObject<P>>,
  right: Vec<TemporalObject<P>>,
) -> Binary<P> {
  binary(
    operators::difference::<P>("minus", &SweepAreaConfig::default()).unwrap(),
    left,
    right,
  )
}

#[test]
fn test_difference_cuts_overlap_right_first() {
  let run = difference(vec![obj("x", 0, 10)], vec![obj("x", 5, 15)]);
  run.graph.drain_source(run.right).unwrap();
  assert!(run.out.elements().is_empty());
  run.graph.drain_source(run.left).unwrap();

  assert_eq!(run.out.elements(), vec![obj("x", 0, 5)]);
  assert!(run.out.is_done());
}

#[test]
fn test_difference_cuts_overlap_left_first() {
  let run = difference(vec![obj("x", 0, 10)], vec![obj("x", 5, 15)]);
  run.graph.drain_source(run.left).unwrap();
  assert!(run.out.elements().is_empty());
  run.graph.drain_source(run.right).unwrap();

  assert_eq!(run.out.elements(), vec![obj("x", 0, 5)]);
  assert!(run.out.is_done());
}

#[test]
fn test_difference_ignores_other_payloads() {
  let run = difference(vec![obj("x", 0, 3)], vec![obj("y", 0, 3)]);
  run.graph.drain_source(run.left).unwrap();
  run.graph.drain_source(run.right).unwrap();
  assert_eq!(run.out.elements(), vec![obj("x", 0, 3)]);
}

#[test]
fn test_difference_respects_multiplicity() {
  let run = difference(vec![obj('x', 0, 10), obj('x', 0, 10)], vec![obj('x', 2, 4)]);
  run.graph.drain_source(run.left).unwrap();
  run.graph.drain_source(run.right).unwrap();

  let output = run.out.elements();
  let starts: Vec<u64> = output.iter().map(TemporalObject::start).collect();
  assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
  let mut pieces = intervals(&output);
  pieces.sort_unstable();
  assert_eq!(pieces, vec![(0, 2), (0, 10), (4, 10)]);
}

#[test]
fn test_difference_completes_once_left_is_drained() {
  let run = difference::<u64>(vec![], points(&[1, 2, 3]));
  run.graph.drain_source(run.left).unwrap();

  assert!(run.graph.is_done(run.operator));
  assert!(run.out.is_done());
  assert!(run.out.elements().is_empty());
}

#[test]
fn test_difference_emits_before_completion_when_heartbeats_allow() {
  let run = difference(vec![obj(1_u64, 0, 4), obj(1, 6, 8)], vec![obj(1, 2, 3), obj(1, 9, 12)]);
  run.graph.step_source(run.left).unwrap();
  run.graph.step_source(run.right).unwrap();
  run.graph.step_source(run.right).unwrap();
  // The left bound is still 0.
  assert!(run.out.elements().is_empty());

  // Both bounds pass 4: [0,2) and [3,4) can no longer be cancelled.
  run.graph.step_source(run.left).unwrap();
  assert_eq!(intervals(&run.out.elements()), vec![(0, 2), (3, 4)]);

  run.graph.drain_source(run.left).unwrap();
  assert!(run.out.is_done());
  run.graph.drain_source(run.right).unwrap();
  assert_eq!(intervals(&run.out.elements()), vec![(0, 2), (3, 4), (6, 8)]);
  assert!(run.out.is_done());
}

// ============================================================================
// Join
// ============================================================================

#[test]
fn test_join_combines_overlapping_matches() {
  let join = TemporalJoin::new(
    &SweepAreaConfig::default(),
    |l: &u64, r: &u64| l == r,
    |l: &u64, r: &u64| l * 10 + r,
  )
  .unwrap();
  let run = binary(
    TemporalPipe::new("join", join),
    vec![obj(1, 0, 10), obj(2, 1, 4)],
    vec![obj(1, 5, 8), obj(2, 6, 9)],
  );
  run.graph.drain_source(run.left).unwrap();
  run.graph.drain_source(run.right).unwrap();

  assert_eq!(run.out.elements(), vec![obj(11, 5, 8)]);
  assert!(run.out.is_done());
}

// ============================================================================
// Union
// ============================================================================

#[test]
fn test_union_merges_in_start_order() {
  let union = Arc::new(operators::union::<u64>("union", &SweepAreaConfig::default()).unwrap());
  let graph: Graph<u64> = Graph::new("union");
  let a = graph.add_node(CursorSource::from_vec("a", points(&[1, 4, 6])));
  let b = graph.add_node(CursorSource::from_vec("b", points(&[2, 3, 7])));
  let union_id = graph.add_shared_node(union.clone());
  let out = Arc::new(CollectSink::<u64>::new("out"));
  let out_id = graph.add_shared_node(out.clone());
  graph.connect(a, union_id, 0).unwrap();
  graph.connect(b, union_id, 1).unwrap();
  graph.connect(union_id, out_id, 0).unwrap();
  graph.open_all().unwrap();

  graph.step_source(a).unwrap();
  assert_eq!(union.inspect(|u| u.buffered()), 1);
  for _ in 0..3 {
    graph.step_source(b).unwrap();
    graph.step_source(a).unwrap();
  }
  graph.drain_source(b).unwrap();

  assert_eq!(out.payloads(), vec![1, 2, 3, 4, 6, 7]);
  assert_eq!(union.inspect(|u| u.buffered()), 0);
  assert!(out.is_done());
}

// ============================================================================
// Stateless operators
// ============================================================================

fn unary<O: operators::Operator<u64>>(operator: TemporalPipe<u64, O>, values: &[u64]) -> Arc<CollectSink<u64>> {
  let graph: Graph<u64> = Graph::new("unary");
  let source = graph.add_node(CursorSource::from_vec("s", points(values)).with_heartbeats(true));
  let op = graph.add_node(operator.with_heartbeats(true));
  let out = Arc::new(CollectSink::<u64>::new("out"));
  let out_id = graph.add_shared_node(out.clone());
  graph.connect(source, op, 0).unwrap();
  graph.connect(op, out_id, 0).unwrap();
  graph.open_all().unwrap();
  graph.drain_source(source).unwrap();
  out
}

#[test]
fn test_mapper_rewrites_payloads() {
  let out = unary(TemporalPipe::new("inc", TemporalMapper::new(|p: u64| p + 1)), &[1, 2]);
  assert_eq!(out.payloads(), vec![2, 3]);
  assert_eq!(intervals(&out.elements()), vec![(1, 2), (2, 3)]);
}

#[test]
fn test_fixed_window_aligns_elements_and_heartbeats() {
  let out = unary(TemporalPipe::new("w", TemporalWindow::fixed(5, 0)), &[1, 7]);
  assert_eq!(intervals(&out.elements()), vec![(0, 5), (5, 10)]);
  assert_eq!(out.heartbeats(), vec![0, 5]);
}

#[test]
fn test_sliding_window_extends_validity() {
  let out = unary(operators::sliding_window("w", 3), &[2, 4]);
  assert_eq!(intervals(&out.elements()), vec![(2, 6), (4, 8)]);
}

#[test]
fn test_window_assignment() {
  let sliding = WindowKind::Sliding { size: 0 };
  assert_eq!(sliding.assign(4), TimeInterval::point(4));

  let fixed = WindowKind::Fixed { size: 10, offset: 3 };
  assert_eq!(fixed.assign(3), TimeInterval::new(3, 13).unwrap());
  assert_eq!(fixed.assign(12), TimeInterval::new(3, 13).unwrap());
  assert_eq!(fixed.assign(2), TimeInterval::new(0, 3).unwrap());
  assert_eq!(TemporalWindow::fixed(0, 0).kind(), WindowKind::Fixed { size: 1, offset: 0 });
}

#[test]
fn test_fixed_window_near_the_timestamp_limit() {
  let huge = WindowKind::Fixed {
    size: u64::MAX - 1,
    offset: 5,
  };
  assert_eq!(huge.assign(3), TimeInterval::new(0, 5).unwrap());
  assert_eq!(huge.assign(10), TimeInterval::open_ended(5));
  assert_eq!(huge.assign(u64::MAX - 2).start(), 5);
}
