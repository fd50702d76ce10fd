//! End-to-end heartbeat ordering: random sources with heartbeats feed the
//! stateful operators, and an ordering verifier in front of each sink checks
//! that no element ever starts before a heartbeat that preceded it. A third
//! verifier reads both sources directly, one per input.
//!
//! The operators' forwarded heartbeats must strictly increase and their
//! minimum timestamps must never decrease.

use proptest::prelude::*;
use rand::Rng;
use std::sync::Arc;
use timeweave::config::SweepAreaConfig;
use timeweave::graph::Graph;
use timeweave::heartbeat::verify_heartbeat_ordering;
use timeweave::node::{Node, NodeId, Sink};
use timeweave::time::Timestamp;
use timeweave::operators::{self, CollectSink, CursorSource};
use timeweave::telemetry::init_tracing;

struct Checked {
  verifier: NodeId,
  out: Arc<CollectSink<u64>>,
}

fn checked_sink(graph: &Graph<u64>, name: &str) -> Checked {
  let out = Arc::new(CollectSink::<u64>::new(name));
  let inner: Arc<dyn Node<u64>> = out.clone();
  let verifier = graph.add_node(verify_heartbeat_ordering(inner));
  Checked { verifier, out }
}

fn strictly_increasing(heartbeats: &[Timestamp]) -> bool {
  heartbeats.windows(2).all(|pair| pair[0] < pair[1])
}

fn random_source(name: &str, seed: u64, count: usize) -> CursorSource<u64> {
  CursorSource::random(name, seed, count, 4, |rng, _| rng.gen_range(0..3u64)).with_heartbeats(true)
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(48))]

  #[test]
  fn operators_never_emit_behind_their_heartbeats(
    seeds in (any::<u64>(), any::<u64>()),
    counts in (1usize..40, 1usize..40),
    schedule in prop::collection::vec(any::<bool>(), 0..80),
  ) {
    init_tracing(tracing::Level::WARN);
    let config = SweepAreaConfig::default();
    let graph: Graph<u64> = Graph::new("ordering");
    let left = graph.add_node(random_source("left", seeds.0, counts.0));
    let right = graph.add_node(random_source("right", seeds.1, counts.1));
    let minus = graph.add_node(operators::difference("minus", &config).unwrap().with_heartbeats(true));
    let union = graph.add_node(operators::union("union", &config).unwrap().with_heartbeats(true));
    let checked = [
      checked_sink(&graph, "minus-out"),
      checked_sink(&graph, "union-out"),
      checked_sink(&graph, "sources-out"),
    ];

    for (operator, sink) in [(minus, &checked[0]), (union, &checked[1])] {
      graph.connect(left, operator, 0).unwrap();
      graph.connect(right, operator, 1).unwrap();
      graph.connect(operator, sink.verifier, 0).unwrap();
    }
    graph.connect(left, checked[2].verifier, 0).unwrap();
    graph.connect(right, checked[2].verifier, 1).unwrap();
    graph.open_all().unwrap();

    let mut minimums: [Option<Timestamp>; 2] = [None, None];
    for pick_left in schedule {
      let step = graph.step_source(if pick_left { left } else { right });
      prop_assert!(step.is_ok(), "{:?}", step);
      for (operator, previous) in [minus, union].into_iter().zip(&mut minimums) {
        let current = graph.min_timestamp(operator);
        if let (Some(before), Some(now)) = (*previous, current) {
          prop_assert!(now >= before, "minimum of {} fell from {} to {}", operator, before, now);
        }
        if current.is_some() {
          *previous = current;
        }
      }
    }
    prop_assert!(graph.drain_source(left).is_ok());
    prop_assert!(graph.drain_source(right).is_ok());

    for sink in &checked {
      prop_assert_eq!(graph.fault(sink.verifier), None);
      prop_assert!(sink.out.is_done());
    }
    prop_assert_eq!(checked[1].out.elements().len(), counts.0 + counts.1);
    prop_assert_eq!(checked[2].out.elements().len(), counts.0 + counts.1);
    for sink in &checked[..2] {
      let heartbeats = sink.out.heartbeats();
      prop_assert!(strictly_increasing(&heartbeats), "{:?}", heartbeats);
    }
  }
}
