//! # Query Executor
//!
//! A small driver for graphs fed by steppable sources. A *query* is named by
//! its sink. Starting it opens everything upstream of the sink and makes sure
//! one Tokio task drives each steppable source that reaches it. A source
//! shared by several queries keeps a single driver until the last running
//! query using it stops or completes. Each step runs on the blocking pool,
//! since it pushes the element through the whole synchronous cascade. A
//! polling task checks the registered sinks every poll period and finishes
//! once all of them are done or stopped.
//!
//! ```rust,no_run
//! use timeweave::config::ExecutorConfig;
//! use timeweave::executor::QueryExecutor;
//! use timeweave::graph::Graph;
//! use timeweave::operators::{CollectSink, CursorSource};
//! use timeweave::time::TemporalObject;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph: Graph<u32> = Graph::new("q");
//! let source = graph.add_node(CursorSource::from_vec("s", vec![TemporalObject::point(1_u32, 0)]));
//! let sink = graph.add_node(CollectSink::<u32>::new("out"));
//! graph.connect(source, sink, 0)?;
//!
//! let executor = QueryExecutor::new(graph, ExecutorConfig::default());
//! executor.register_query(sink)?;
//! executor.start_all()?;
//! executor.wait_for_completion().await;
//! # Ok(())
//! # }
//! ```

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, GraphError};
use crate::graph::Graph;
use crate::node::{NodeId, SourceStep};
use crate::time::Payload;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a registered query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryState {
  /// Registered, not started.
  Registered,
  /// Sources are being driven.
  Running,
  /// The sink has completed.
  Done,
  /// Stopped by the caller before completing.
  Stopped,
}

impl QueryState {
  fn is_final(self) -> bool {
    matches!(self, QueryState::Done | QueryState::Stopped)
  }
}

struct Query {
  state: QueryState,
}

/// The task stepping one source, and the running queries it feeds.
struct Driver {
  token: CancellationToken,
  users: BTreeSet<NodeId>,
}

#[derive(Default)]
struct Registry {
  queries: BTreeMap<NodeId, Query>,
  drivers: HashMap<NodeId, Driver>,
  poller: Option<JoinHandle<()>>,
}

impl Registry {
  fn all_final(&self) -> bool {
    !self.queries.is_empty() && self.queries.values().all(|query| query.state.is_final())
  }

  /// Detaches `sink` from every driver and cancels the drivers nobody uses
  /// any more.
  fn release_sources(&mut self, sink: NodeId) {
    self.drivers.retain(|source, driver| {
      driver.users.remove(&sink);
      if driver.users.is_empty() {
        trace!("QueryExecutor::release_sources(source={}) last user {} gone", source, sink);
        driver.token.cancel();
        return false;
      }
      true
    });
  }
}

struct ExecutorShared<P: Payload> {
  graph: Graph<P>,
  config: ExecutorConfig,
  registry: Mutex<Registry>,
  shutdown: CancellationToken,
  finished: watch::Sender<bool>,
}

/// Drives registered queries to completion on the current Tokio runtime.
///
/// Cheap to clone; clones share the same registry.
pub struct QueryExecutor<P: Payload> {
  shared: Arc<ExecutorShared<P>>,
}

impl<P: Payload> Clone for QueryExecutor<P> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<P: Payload> QueryExecutor<P> {
  /// Creates an executor for `graph`.
  pub fn new(graph: Graph<P>, config: ExecutorConfig) -> Self {
    let (finished, _) = watch::channel(false);
    Self {
      shared: Arc::new(ExecutorShared {
        graph,
        config,
        registry: Mutex::new(Registry::default()),
        shutdown: CancellationToken::new(),
        finished,
      }),
    }
  }

  /// The driven graph.
  pub fn graph(&self) -> &Graph<P> {
    &self.shared.graph
  }

  /// Registers the query ending in `sink`. Registering twice is a no-op.
  ///
  /// # Errors
  ///
  /// Fails if `sink` is unknown or cannot consume elements.
  pub fn register_query(&self, sink: NodeId) -> Result<(), ExecutorError> {
    let node = self.shared.graph.node(sink).ok_or(GraphError::UnknownNode(sink))?;
    if node.as_sink().is_none() {
      return Err(GraphError::NotASink(sink).into());
    }
    let mut registry = self.shared.registry.lock();
    registry.queries.entry(sink).or_insert(Query {
      state: QueryState::Registered,
    });
    self.shared.finished.send_replace(false);
    trace!("QueryExecutor::register_query(sink={})", sink);
    Ok(())
  }

  /// Registered queries.
  pub fn queries(&self) -> Vec<NodeId> {
    self.shared.registry.lock().queries.keys().copied().collect()
  }

  /// State of the query ending in `sink`.
  pub fn status(&self, sink: NodeId) -> Option<QueryState> {
    self.shared.registry.lock().queries.get(&sink).map(|query| query.state)
  }

  /// Opens every node upstream of `sink` and starts driving its sources.
  /// Starting a running query is a no-op.
  ///
  /// Sources already driven for another query are shared with it.
  ///
  /// # Errors
  ///
  /// Returns [`ExecutorError::UnknownQuery`] for an unregistered sink,
  /// [`ExecutorError::NoRuntime`] outside a Tokio runtime, and a graph error
  /// if an upstream node cannot be opened.
  pub fn start_query(&self, sink: NodeId) -> Result<(), ExecutorError> {
    let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
    let mut registry = self.shared.registry.lock();
    match registry.queries.get(&sink) {
      None => return Err(ExecutorError::UnknownQuery(sink)),
      Some(query) if query.state == QueryState::Running => return Ok(()),
      Some(_) => {}
    }

    let sources = self.shared.graph.with_topology(|topology| {
      let upstream = topology.upstream(&[sink]);
      for &id in &upstream {
        let skip = topology.node(id).is_none_or(|node| node.is_closed());
        if !skip {
          topology.open_node(id)?;
        }
      }
      Ok::<_, GraphError>(
        upstream
          .into_iter()
          .filter(|id| {
            topology
              .node(*id)
              .and_then(|node| node.as_source())
              .is_some_and(|source| source.is_steppable())
          })
          .collect::<Vec<_>>(),
      )
    })?;

    let mut spawned = 0;
    for source in sources {
      if let Some(driver) = registry.drivers.get_mut(&source) {
        driver.users.insert(sink);
        continue;
      }
      let token = self.shared.shutdown.child_token();
      runtime.spawn(drive(
        self.shared.graph.clone(),
        source,
        token.clone(),
        self.shared.config.source_pause(),
        self.shared.config.poll_period(),
      ));
      registry.drivers.insert(
        source,
        Driver {
          token,
          users: BTreeSet::from([sink]),
        },
      );
      spawned += 1;
    }
    debug!(graph = %self.shared.graph.name(), sink = %sink, spawned, "query started");

    if let Some(query) = registry.queries.get_mut(&sink) {
      query.state = QueryState::Running;
    }
    let poller_alive = registry.poller.as_ref().is_some_and(|poller| !poller.is_finished());
    if !poller_alive {
      self.shared.finished.send_replace(false);
      registry.poller = Some(runtime.spawn(poll(Arc::clone(&self.shared))));
    }
    Ok(())
  }

  /// Stops driving the query's sources and closes its sink.
  ///
  /// # Errors
  ///
  /// Returns [`ExecutorError::UnknownQuery`] for an unregistered sink.
  pub fn stop_query(&self, sink: NodeId) -> Result<(), ExecutorError> {
    {
      let mut registry = self.shared.registry.lock();
      let query = registry
        .queries
        .get_mut(&sink)
        .ok_or(ExecutorError::UnknownQuery(sink))?;
      if query.state != QueryState::Done {
        query.state = QueryState::Stopped;
      }
      registry.release_sources(sink);
      if registry.all_final() {
        self.shared.finished.send_replace(true);
      }
    }
    if let Err(error) = self.shared.graph.close(sink) {
      warn!(sink = %sink, %error, "closing a stopped query's sink failed");
    }
    debug!(graph = %self.shared.graph.name(), sink = %sink, "query stopped");
    Ok(())
  }

  /// Starts every registered query.
  ///
  /// # Errors
  ///
  /// Stops at the first query that fails to start.
  pub fn start_all(&self) -> Result<(), ExecutorError> {
    for sink in self.queries() {
      if self.status(sink) == Some(QueryState::Registered) {
        self.start_query(sink)?;
      }
    }
    Ok(())
  }

  /// Stops every query that has not finished and shuts the poller down.
  pub fn stop_all(&self) {
    for sink in self.queries() {
      if self.status(sink).is_some_and(|state| !state.is_final()) {
        if let Err(error) = self.stop_query(sink) {
          warn!(sink = %sink, %error, "stopping query failed");
        }
      }
    }
    self.shared.shutdown.cancel();
    self.shared.finished.send_replace(true);
  }

  /// Returns true once every registered query is done or stopped.
  pub fn is_finished(&self) -> bool {
    *self.shared.finished.borrow()
  }

  /// Waits until every registered query is done or stopped.
  pub async fn wait_for_completion(&self) {
    let mut finished = self.shared.finished.subscribe();
    let _ = finished.wait_for(|done| *done).await;
  }
}

/// Steps `source` on the blocking pool until it is exhausted, fails or its
/// last query lets go of it.
async fn drive<P: Payload>(
  graph: Graph<P>,
  source: NodeId,
  token: CancellationToken,
  pause: Duration,
  idle: Duration,
) {
  trace!("QueryExecutor::drive(source={})", source);
  let mut emitted: u64 = 0;
  while !token.is_cancelled() {
    let step = {
      let graph = graph.clone();
      tokio::task::spawn_blocking(move || graph.step_source(source)).await
    };
    let wait = match step {
      Ok(Ok(SourceStep::Emitted)) => {
        emitted += 1;
        pause
      }
      Ok(Ok(SourceStep::Idle)) => idle,
      Ok(Ok(SourceStep::Exhausted)) => break,
      Ok(Err(error)) => {
        warn!(graph = %graph.name(), source = %source, %error, "source driver stopped on error");
        break;
      }
      Err(error) => {
        warn!(graph = %graph.name(), source = %source, %error, "source step did not complete");
        break;
      }
    };
    if wait.is_zero() {
      tokio::task::yield_now().await;
    } else {
      tokio::select! {
        _ = token.cancelled() => break,
        _ = tokio::time::sleep(wait) => {}
      }
    }
  }
  debug!(graph = %graph.name(), source = %source, emitted, "source driver finished");
}

/// Marks completed queries done and finishes once nothing is left running.
async fn poll<P: Payload>(shared: Arc<ExecutorShared<P>>) {
  let period = shared.config.poll_period();
  loop {
    {
      let mut registry = shared.registry.lock();
      let completed: Vec<NodeId> = registry
        .queries
        .iter()
        .filter(|(sink, query)| query.state == QueryState::Running && shared.graph.is_done(**sink))
        .map(|(sink, _)| *sink)
        .collect();
      for sink in completed {
        if let Some(query) = registry.queries.get_mut(&sink) {
          query.state = QueryState::Done;
        }
        registry.release_sources(sink);
        info!(graph = %shared.graph.name(), sink = %sink, "query completed");
      }
      if registry.all_final() {
        shared.finished.send_replace(true);
        debug!(graph = %shared.graph.name(), "all queries finished, poller exiting");
        return;
      }
    }
    tokio::select! {
      _ = shared.shutdown.cancelled() => return,
      _ = tokio::time::sleep(period) => {}
    }
  }
}
