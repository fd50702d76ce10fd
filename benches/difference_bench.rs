//! # Difference Benchmark
//!
//! Runs two seeded random sources through a temporal difference and counts
//! the results. Compares the lazy and memory-saving reorganization modes of
//! the underlying sweep areas.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::Rng;
use std::sync::Arc;
use timeweave::config::SweepAreaConfig;
use timeweave::graph::Graph;
use timeweave::operators::{self, CollectSink, CursorSource};
use timeweave::sweep_area::ReorganizeMode;

/// Builds `left - right` over `count` elements per side and drains both
/// sources, alternating between them.
fn difference(count: usize, mode: ReorganizeMode) -> usize {
  let config = SweepAreaConfig::default().with_reorganize_mode(mode);
  let graph: Graph<u64> = Graph::new("difference-bench");
  let left = graph.add_node(CursorSource::random("left", 7, count, 3, |rng, _| rng.gen_range(0..16u64)));
  let right = graph.add_node(CursorSource::random("right", 11, count, 3, |rng, _| rng.gen_range(0..16u64)));
  let minus = graph.add_node(operators::difference("minus", &config).unwrap());
  let out = Arc::new(CollectSink::<u64>::new("out"));
  let out_id = graph.add_shared_node(out.clone());
  graph.connect(left, minus, 0).unwrap();
  graph.connect(right, minus, 1).unwrap();
  graph.connect(minus, out_id, 0).unwrap();
  graph.open_all().unwrap();

  for _ in 0..count {
    graph.step_source(left).unwrap();
    graph.step_source(right).unwrap();
  }
  graph.drain_source(left).unwrap();
  graph.drain_source(right).unwrap();
  out.elements().len()
}

fn difference_benchmark(c: &mut Criterion) {
  let mut group = c.benchmark_group("difference");
  group.sample_size(10);
  group.warm_up_time(std::time::Duration::from_secs(1));
  group.measurement_time(std::time::Duration::from_secs(3));

  for size in [100, 1000, 10000].iter() {
    group.throughput(Throughput::Elements(2 * *size as u64));
    for (label, mode) in [("lazy", ReorganizeMode::Lazy), ("save_memory", ReorganizeMode::SaveMemory)] {
      group.bench_with_input(BenchmarkId::new(label, size), size, |b, &size| {
        b.iter(|| difference(size, mode));
      });
    }
  }

  group.finish();
}

criterion_group!(benches, difference_benchmark);
criterion_main!(benches);
