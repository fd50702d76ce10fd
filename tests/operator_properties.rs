//! Property tests for the stateful operators against brute-force references.
//!
//! Inputs are small random streams of start-ordered intervals over a handful
//! of payloads; the two sources are stepped in a random interleaving before
//! being drained.

use proptest::prelude::*;
use std::sync::Arc;
use timeweave::config::SweepAreaConfig;
use timeweave::graph::Graph;
use timeweave::node::{NodeId, Sink};
use timeweave::operators::{self, CollectSink, CursorSource};
use timeweave::time::TemporalObject;

const PAYLOADS: u8 = 3;
const HORIZON: u64 = 32;

fn stream() -> impl Strategy<Value = Vec<TemporalObject<u8>>> {
  prop::collection::vec((0..PAYLOADS, 0u64..20, 1u64..6), 0..12).prop_map(|mut raw| {
    raw.sort_by_key(|(_, start, _)| *start);
    raw
      .into_iter()
      .map(|(payload, start, length)| TemporalObject::valid(payload, start, start + length).unwrap())
      .collect()
  })
}

fn coverage(elements: &[TemporalObject<u8>], payload: u8, t: u64) -> usize {
  elements
    .iter()
    .filter(|element| *element.payload() == payload && element.interval().contains(t))
    .count()
}

fn run(
  graph: &Graph<u8>,
  left: NodeId,
  right: NodeId,
  schedule: &[bool],
) -> Result<(), TestCaseError> {
  for &pick_left in schedule {
    let source = if pick_left { left } else { right };
    prop_assert!(graph.step_source(source).is_ok());
  }
  prop_assert!(graph.drain_source(left).is_ok());
  prop_assert!(graph.drain_source(right).is_ok());
  Ok(())
}

fn binary(
  operator: impl timeweave::node::Node<u8> + 'static,
  left: &[TemporalObject<u8>],
  right: &[TemporalObject<u8>],
) -> (Graph<u8>, NodeId, NodeId, Arc<CollectSink<u8>>) {
  let graph: Graph<u8> = Graph::new("properties");
  let left = graph.add_node(CursorSource::from_vec("left", left.to_vec()));
  let right = graph.add_node(CursorSource::from_vec("right", right.to_vec()));
  let op = graph.add_node(operator);
  let out = Arc::new(CollectSink::<u8>::new("out"));
  let out_id = graph.add_shared_node(out.clone());
  graph.connect(left, op, 0).unwrap();
  graph.connect(right, op, 1).unwrap();
  graph.connect(op, out_id, 0).unwrap();
  graph.open_all().unwrap();
  (graph, left, right, out)
}

fn starts_ordered(elements: &[TemporalObject<u8>]) -> bool {
  elements.windows(2).all(|pair| pair[0].start() <= pair[1].start())
}

proptest! {
  #[test]
  fn difference_matches_pointwise_counts(
    left in stream(),
    right in stream(),
    schedule in prop::collection::vec(any::<bool>(), 0..40),
  ) {
    let minus = operators::difference::<u8>("minus", &SweepAreaConfig::default()).unwrap();
    let (graph, l, r, out) = binary(minus, &left, &right);
    run(&graph, l, r, &schedule)?;

    let output = out.elements();
    prop_assert!(out.is_done());
    prop_assert!(starts_ordered(&output), "unordered output {:?}", output);
    for payload in 0..PAYLOADS {
      for t in 0..HORIZON {
        let expected = coverage(&left, payload, t).saturating_sub(coverage(&right, payload, t));
        prop_assert_eq!(coverage(&output, payload, t), expected, "payload {} at {}", payload, t);
      }
    }
  }

  #[test]
  fn union_is_an_ordered_merge(
    left in stream(),
    right in stream(),
    schedule in prop::collection::vec(any::<bool>(), 0..40),
  ) {
    let union = operators::union::<u8>("union", &SweepAreaConfig::default()).unwrap();
    let (graph, l, r, out) = binary(union, &left, &right);
    run(&graph, l, r, &schedule)?;

    let output = out.elements();
    prop_assert!(out.is_done());
    prop_assert!(starts_ordered(&output));

    let key = |e: &TemporalObject<u8>| (e.start(), e.end(), *e.payload());
    let mut expected: Vec<_> = left.iter().chain(&right).map(key).collect();
    let mut actual: Vec<_> = output.iter().map(key).collect();
    expected.sort_unstable();
    actual.sort_unstable();
    prop_assert_eq!(actual, expected);
  }
}
