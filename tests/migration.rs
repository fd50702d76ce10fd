//! Plan migration over arbitrary reference points.
//!
//! The old plan and the new plan apply the same two filters in opposite
//! order. Whatever the reference point and however far the source has
//! advanced when the migration starts, the sink must see every element that
//! passes both filters exactly once.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use timeweave::graph::Graph;
use timeweave::migration::MigrationPlan;
use timeweave::node::{NodeId, Sink};
use timeweave::operators::{self, CollectSink, CursorSource};
use timeweave::time::TemporalObject;

fn elements() -> impl Strategy<Value = Vec<TemporalObject<u32>>> {
  prop::collection::vec((0u64..3, 1u64..6), 1..15).prop_map(|raw| {
    let mut start = 0;
    raw
      .into_iter()
      .enumerate()
      .map(|(index, (gap, length))| {
        start += gap;
        TemporalObject::valid(index as u32, start, start + length).unwrap()
      })
      .collect()
  })
}

fn not_multiple_of_three(element: &TemporalObject<u32>) -> bool {
  element.payload() % 3 != 0
}

fn even(element: &TemporalObject<u32>) -> bool {
  element.payload() % 2 == 0
}

/// `first -> second`, returning the chain's entry and exit.
fn chain(
  graph: &Graph<u32>,
  name: &str,
  first: fn(&TemporalObject<u32>) -> bool,
  second: fn(&TemporalObject<u32>) -> bool,
) -> (NodeId, NodeId) {
  let entry = graph.add_node(operators::filter(format!("{name}-entry"), first));
  let exit = graph.add_node(operators::filter(format!("{name}-exit"), second));
  graph.connect(entry, exit, 0).unwrap();
  (entry, exit)
}

fn key(element: &TemporalObject<u32>) -> (u32, u64, u64) {
  (*element.payload(), element.start(), element.end())
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn migration_preserves_every_element(
    input in elements(),
    reference_point in 0u64..40,
    advance in 0usize..15,
  ) {
    let advance = advance % input.len();
    let graph: Graph<u32> = Graph::new("migration");
    let source = graph.add_node(CursorSource::from_vec("source", input.clone()));
    let (old_entry, old_exit) = chain(&graph, "old", not_multiple_of_three, even);
    let (new_entry, new_exit) = chain(&graph, "new", even, not_multiple_of_three);
    let out = Arc::new(CollectSink::<u32>::new("out"));
    let sink = graph.add_shared_node(out.clone());
    graph.connect(source, old_entry, 0).unwrap();
    graph.connect(old_exit, sink, 0).unwrap();
    graph.open_all().unwrap();

    for _ in 0..advance {
      graph.step_source(source).unwrap();
    }
    let handle = MigrationPlan::new(reference_point)
      .split(source, old_entry, new_entry)
      .union(sink, old_exit, new_exit)
      .start(&graph, |_| {})
      .unwrap();
    graph.drain_source(source).unwrap();

    let report = handle.wait_timeout(Duration::from_secs(10));
    prop_assert!(report.is_some(), "migration did not complete");
    let report = report.unwrap();
    prop_assert!(report.errors.is_empty(), "{:?}", report.errors);
    prop_assert!(out.is_done());

    let mut expected: Vec<_> = input
      .iter()
      .filter(|element| even(element) && not_multiple_of_three(element))
      .map(key)
      .collect();
    let mut actual: Vec<_> = out.elements().iter().map(key).collect();
    expected.sort_unstable();
    actual.sort_unstable();
    prop_assert_eq!(actual, expected);
  }
}
