//! Timer-driven heartbeat injection.
//!
//! A [`HeartbeatGenerator`] keeps a list of registrations, each a target
//! node with a delay, a value function and an origin tag. On every wake-up it
//! subtracts the time actually slept from every registration and fires the
//! ones that reach zero. A registration added mid-sleep wakes the loop at once
//! and starts counting from its own registration. One loop serves any number
//! of targets.
//!
//! Values are computed while only the generator's own lock is held; delivery
//! happens afterwards under the graph's read lock, so a value function may
//! itself read the graph.

use super::HeartbeatFunction;
use crate::config::HeartbeatConfig;
use crate::error::{GraphError, HeartbeatError, NodeError};
use crate::graph::Graph;
use crate::node::{HeartbeatOrigin, NodeId};
use crate::time::{Payload, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Handle returned by [`HeartbeatGenerator::register`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RegistrationId(u64);

struct Registration {
  id: RegistrationId,
  target: NodeId,
  delay: u64,
  remaining: u64,
  origin: HeartbeatOrigin,
  function: Box<dyn HeartbeatFunction>,
}

struct Registry {
  next_id: u64,
  entries: Vec<Registration>,
}

/// Multiplexes periodic heartbeat injection for many targets onto one loop.
pub struct HeartbeatGenerator<P: Payload> {
  graph: Graph<P>,
  default_delay: Duration,
  registry: Mutex<Registry>,
  changed: Notify,
}

impl<P: Payload> HeartbeatGenerator<P> {
  /// Creates a generator for `graph` with the configured default delay.
  pub fn new(graph: Graph<P>, config: &HeartbeatConfig) -> Self {
    Self {
      graph,
      default_delay: Duration::from_millis(config.generator_delay_ms),
      registry: Mutex::new(Registry {
        next_id: 0,
        entries: Vec::new(),
      }),
      changed: Notify::new(),
    }
  }

  /// Registers `function` to feed `target` every `delay` (or the default
  /// delay).
  ///
  /// # Errors
  ///
  /// Returns [`HeartbeatError::ZeroDelay`] for a zero delay and a graph error
  /// if `target` is unknown or does not accept heartbeats.
  pub fn register(
    &self,
    target: NodeId,
    delay: Option<Duration>,
    origin: HeartbeatOrigin,
    function: impl HeartbeatFunction + 'static,
  ) -> Result<RegistrationId, HeartbeatError> {
    let delay = delay.unwrap_or(self.default_delay);
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
      return Err(HeartbeatError::ZeroDelay);
    }
    let node = self.graph.node(target).ok_or(GraphError::UnknownNode(target))?;
    if node.as_heartbeat().is_none() {
      return Err(GraphError::NotHeartbeatCapable(target).into());
    }
    let id = {
      let mut registry = self.registry.lock();
      let id = RegistrationId(registry.next_id);
      registry.next_id += 1;
      registry.entries.push(Registration {
        id,
        target,
        delay: millis,
        remaining: millis,
        origin,
        function: Box::new(function),
      });
      id
    };
    trace!("HeartbeatGenerator::register(target={}, delay_ms={}, origin={:?})", target, millis, origin);
    self.changed.notify_one();
    Ok(id)
  }

  /// Removes a registration. Returns false if it was already gone.
  pub fn unregister(&self, id: RegistrationId) -> bool {
    let mut registry = self.registry.lock();
    let before = registry.entries.len();
    registry.entries.retain(|entry| entry.id != id);
    registry.entries.len() != before
  }

  /// Number of live registrations.
  pub fn len(&self) -> usize {
    self.registry.lock().entries.len()
  }

  /// Returns true if nothing is registered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Time until the next registration is due.
  pub fn next_wakeup(&self) -> Option<Duration> {
    self
      .registry
      .lock()
      .entries
      .iter()
      .map(|entry| entry.remaining)
      .min()
      .map(Duration::from_millis)
  }

  /// Advances every counter by `elapsed` and fires the registrations that
  /// fall due. Returns the number of heartbeats delivered.
  ///
  /// Registrations whose function is exhausted, or whose target vanished or
  /// closed, are removed.
  pub fn advance(&self, elapsed: Duration) -> usize {
    self.tick(elapsed, u64::MAX)
  }

  /// Like [`advance`](Self::advance), but registrations with an id at or
  /// above `horizon` were added during `elapsed` and keep their full delay.
  fn tick(&self, elapsed: Duration, horizon: u64) -> usize {
    let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let due: Vec<(RegistrationId, NodeId, HeartbeatOrigin, Timestamp)> = {
      let mut registry = self.registry.lock();
      let mut due = Vec::new();
      registry.entries.retain_mut(|entry| {
        if entry.id.0 < horizon {
          entry.remaining = entry.remaining.saturating_sub(elapsed);
        }
        if entry.remaining > 0 {
          return true;
        }
        entry.remaining = entry.delay;
        match entry.function.next_heartbeat() {
          Some(value) => {
            due.push((entry.id, entry.target, entry.origin, value));
            true
          }
          None => {
            debug!(target_node = %entry.target, "heartbeat function exhausted, unregistering");
            false
          }
        }
      });
      due
    };

    let mut delivered = 0;
    let mut dead = Vec::new();
    for (id, target, origin, value) in due {
      match self.graph.heartbeat(target, value, origin) {
        Ok(()) => delivered += 1,
        Err(NodeError::Closed(_)) | Err(NodeError::Graph(GraphError::UnknownNode(_))) => {
          debug!(target_node = %target, "heartbeat target gone, unregistering");
          dead.push(id);
        }
        Err(error) => {
          warn!(target_node = %target, value, %error, "heartbeat delivery failed");
        }
      }
    }
    if !dead.is_empty() {
      self.registry.lock().entries.retain(|entry| !dead.contains(&entry.id));
    }
    delivered
  }

  /// Runs the wake loop on the current Tokio runtime until the returned
  /// handle is stopped.
  pub fn spawn(self: Arc<Self>) -> GeneratorHandle {
    let token = CancellationToken::new();
    let child = token.clone();
    let task = tokio::spawn(async move {
      loop {
        let Some(wait) = self.next_wakeup() else {
          tokio::select! {
            _ = child.cancelled() => break,
            _ = self.changed.notified() => continue,
          }
        };
        let horizon = self.registry.lock().next_id;
        let started = Instant::now();
        tokio::select! {
          _ = child.cancelled() => break,
          _ = tokio::time::sleep(wait) => {}
          _ = self.changed.notified() => {}
        }
        self.tick(started.elapsed(), horizon);
      }
      debug!(graph = %self.graph.name(), "heartbeat generator stopped");
    });
    GeneratorHandle { token, task }
  }
}

/// Stops a spawned generator loop.
pub struct GeneratorHandle {
  token: CancellationToken,
  task: JoinHandle<()>,
}

impl GeneratorHandle {
  /// Signals the loop to stop and waits for it.
  pub async fn stop(self) {
    self.token.cancel();
    let _ = self.task.await;
  }

  /// Returns true once the loop has exited.
  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }
}
