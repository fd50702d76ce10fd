//! # Executor Test Suite
//!
//! Query registration, driving sources to completion on Tokio, and stopping.

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, GraphError};
use crate::executor::{QueryExecutor, QueryState};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::operators::{self, CollectSink, CursorSource};
use crate::time::TemporalObject;
use std::sync::Arc;
use std::time::Duration;

fn points(count: u64) -> Vec<TemporalObject<u64>> {
  (0..count).map(|t| TemporalObject::point(t, t)).collect()
}

fn fast() -> ExecutorConfig {
  ExecutorConfig::default().with_poll_period(Duration::from_millis(5))
}

/// `source -> filter -> sink`, nothing opened.
fn pipeline(count: u64) -> (Graph<u64>, NodeId, NodeId, Arc<CollectSink<u64>>) {
  let graph: Graph<u64> = Graph::new("executor");
  let source = graph.add_node(CursorSource::from_vec("s", points(count)));
  let filter = graph.add_node(operators::filter("f", |_: &TemporalObject<u64>| true));
  let out = Arc::new(CollectSink::<u64>::new("out"));
  let sink = graph.add_shared_node(out.clone());
  graph.connect(source, filter, 0).unwrap();
  graph.connect(filter, sink, 0).unwrap();
  (graph, source, sink, out)
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_register_requires_a_sink() {
  let (graph, source, sink, _out) = pipeline(1);
  let executor = QueryExecutor::new(graph.clone(), fast());

  assert!(matches!(
    executor.register_query(source),
    Err(ExecutorError::Graph(GraphError::NotASink(id))) if id == source
  ));
  let gone = graph.add_node(CollectSink::<u64>::new("gone"));
  graph.remove_node(gone).unwrap();
  assert!(matches!(
    executor.register_query(gone),
    Err(ExecutorError::Graph(GraphError::UnknownNode(_)))
  ));

  executor.register_query(sink).unwrap();
  executor.register_query(sink).unwrap();
  assert_eq!(executor.queries(), vec![sink]);
  assert_eq!(executor.status(sink), Some(QueryState::Registered));
  assert!(!executor.is_finished());
}

#[test]
fn test_start_needs_a_runtime() {
  let (graph, _source, sink, _out) = pipeline(1);
  let executor = QueryExecutor::new(graph, fast());
  executor.register_query(sink).unwrap();
  assert!(matches!(executor.start_query(sink), Err(ExecutorError::NoRuntime)));
  assert_eq!(executor.status(sink), Some(QueryState::Registered));
}

#[tokio::test]
async fn test_unknown_queries_are_rejected() {
  let (graph, _source, sink, _out) = pipeline(1);
  let executor = QueryExecutor::new(graph, fast());
  assert!(matches!(executor.start_query(sink), Err(ExecutorError::UnknownQuery(id)) if id == sink));
  assert!(matches!(executor.stop_query(sink), Err(ExecutorError::UnknownQuery(_))));
}

// ============================================================================
// Driving
// ============================================================================

#[tokio::test]
async fn test_query_runs_to_completion() {
  let (graph, _source, sink, out) = pipeline(50);
  let executor = QueryExecutor::new(graph, fast());
  executor.register_query(sink).unwrap();
  executor.start_all().unwrap();
  assert_eq!(executor.status(sink), Some(QueryState::Running));

  tokio::time::timeout(Duration::from_secs(10), executor.wait_for_completion())
    .await
    .unwrap();
  assert!(executor.is_finished());
  assert_eq!(executor.status(sink), Some(QueryState::Done));
  assert_eq!(out.payloads(), (0..50).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_shared_source_feeds_every_query() {
  let graph: Graph<u64> = Graph::new("shared");
  let source = graph.add_node(CursorSource::from_vec("s", points(20)));
  let first = Arc::new(CollectSink::<u64>::new("first"));
  let second = Arc::new(CollectSink::<u64>::new("second"));
  let first_id = graph.add_shared_node(first.clone());
  let second_id = graph.add_shared_node(second.clone());
  graph.connect(source, first_id, 0).unwrap();
  graph.connect(source, second_id, 0).unwrap();

  let executor = QueryExecutor::new(graph, fast());
  executor.register_query(first_id).unwrap();
  executor.register_query(second_id).unwrap();
  executor.start_all().unwrap();
  // Already running: no second driver.
  executor.start_query(first_id).unwrap();

  tokio::time::timeout(Duration::from_secs(10), executor.wait_for_completion())
    .await
    .unwrap();
  assert_eq!(first.payloads(), (0..20).collect::<Vec<u64>>());
  assert_eq!(second.payloads(), first.payloads());
  assert_eq!(executor.status(second_id), Some(QueryState::Done));
}

#[tokio::test]
async fn test_stopping_one_query_keeps_a_shared_source_running() {
  let graph: Graph<u64> = Graph::new("shared");
  let source = graph.add_node(CursorSource::from_vec("s", points(50)));
  let first = Arc::new(CollectSink::<u64>::new("first"));
  let second = Arc::new(CollectSink::<u64>::new("second"));
  let first_id = graph.add_shared_node(first.clone());
  let second_id = graph.add_shared_node(second.clone());
  graph.connect(source, first_id, 0).unwrap();
  graph.connect(source, second_id, 0).unwrap();

  let executor = QueryExecutor::new(graph, fast().with_source_pause(Duration::from_millis(2)));
  executor.register_query(first_id).unwrap();
  executor.register_query(second_id).unwrap();
  executor.start_all().unwrap();

  tokio::time::sleep(Duration::from_millis(20)).await;
  executor.stop_query(first_id).unwrap();
  assert!(!executor.is_finished());

  tokio::time::timeout(Duration::from_secs(10), executor.wait_for_completion())
    .await
    .unwrap();
  assert_eq!(executor.status(first_id), Some(QueryState::Stopped));
  assert_eq!(executor.status(second_id), Some(QueryState::Done));
  assert_eq!(second.payloads(), (0..50).collect::<Vec<u64>>());
  assert!(first.payloads().len() < 50);
}

#[tokio::test]
async fn test_stop_query_closes_the_sink() {
  let (graph, _source, sink, out) = pipeline(1_000);
  let config = fast().with_source_pause(Duration::from_secs(3600));
  let executor = QueryExecutor::new(graph.clone(), config);
  executor.register_query(sink).unwrap();
  executor.start_query(sink).unwrap();

  executor.stop_query(sink).unwrap();
  assert_eq!(executor.status(sink), Some(QueryState::Stopped));
  assert!(executor.is_finished());
  assert!(graph.node(sink).unwrap().is_closed());
  tokio::time::timeout(Duration::from_secs(1), executor.wait_for_completion())
    .await
    .unwrap();
  assert!(out.payloads().len() <= 1);
}

#[tokio::test]
async fn test_stop_all_finishes_everything() {
  let (graph, _source, sink, _out) = pipeline(1_000);
  let executor = QueryExecutor::new(graph, fast().with_source_pause(Duration::from_secs(3600)));
  executor.register_query(sink).unwrap();
  executor.start_all().unwrap();

  executor.stop_all();
  assert!(executor.is_finished());
  assert_eq!(executor.status(sink), Some(QueryState::Stopped));
}
