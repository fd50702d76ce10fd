//! # Engine Configuration
//!
//! Tunables for heartbeats, the query executor and sweep areas, loadable from
//! JSON. Every field has a default, so a partial document (or `{}`) is valid.
//!
//! ```rust
//! use timeweave::config::{EngineConfig, HeartbeatPolicy};
//!
//! let config = EngineConfig::from_json_str(
//!   r#"{ "heartbeat": { "activate_on_open": true, "policy": { "every_nth": 4 } } }"#,
//! )
//! .unwrap();
//! assert!(config.heartbeat.activate_on_open);
//! assert_eq!(config.heartbeat.policy, HeartbeatPolicy::EveryNth(4));
//! assert_eq!(config.executor.poll_period_ms, 1000);
//! ```

use crate::error::ConfigError;
use crate::heartbeat::{Always, EveryMillis, EveryNth, HeartbeatPredicate, MinLastHbDifference};
use crate::sweep_area::ReorganizeMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Heartbeat rate-limiting policy, turned into a predicate per node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatPolicy {
  /// Forward every advancing heartbeat.
  #[default]
  Always,
  /// Forward every n-th candidate.
  EveryNth(u64),
  /// Forward at most one candidate per period in milliseconds.
  EveryMillis(u64),
  /// Forward only when the candidate exceeds the last heartbeat by more than
  /// the given amount.
  MinLastHbDifference(u64),
}

impl HeartbeatPolicy {
  /// Builds a fresh predicate implementing the policy.
  pub fn build(&self) -> Box<dyn HeartbeatPredicate> {
    match *self {
      HeartbeatPolicy::Always => Box::new(Always),
      HeartbeatPolicy::EveryNth(n) => Box::new(EveryNth::new(n)),
      HeartbeatPolicy::EveryMillis(millis) => Box::new(EveryMillis::new(millis)),
      HeartbeatPolicy::MinLastHbDifference(delta) => Box::new(MinLastHbDifference(delta)),
    }
  }
}

/// Heartbeat settings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
  /// Default per-target delay of a heartbeat generator (default: 5000).
  pub generator_delay_ms: u64,
  /// Whether nodes built from this config forward heartbeats right away
  /// (default: false).
  pub activate_on_open: bool,
  /// Forwarding policy (default: always).
  pub policy: HeartbeatPolicy,
}

impl Default for HeartbeatConfig {
  fn default() -> Self {
    Self {
      generator_delay_ms: 5000,
      activate_on_open: false,
      policy: HeartbeatPolicy::Always,
    }
  }
}

impl HeartbeatConfig {
  /// Sets the generator's default delay.
  #[must_use]
  pub fn with_generator_delay(mut self, delay: Duration) -> Self {
    self.generator_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    self
  }

  /// Sets whether heartbeats are active from the start.
  #[must_use]
  pub fn with_activate_on_open(mut self, active: bool) -> Self {
    self.activate_on_open = active;
    self
  }

  /// Sets the forwarding policy.
  #[must_use]
  pub fn with_policy(mut self, policy: HeartbeatPolicy) -> Self {
    self.policy = policy;
    self
  }
}

/// Query executor settings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
  /// Completion polling period (default: 1000).
  pub poll_period_ms: u64,
  /// Pause between two elements of a driven source (default: 0, which only
  /// yields to the runtime).
  pub source_pause_ms: u64,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      poll_period_ms: 1000,
      source_pause_ms: 0,
    }
  }
}

impl ExecutorConfig {
  /// Sets the polling period.
  #[must_use]
  pub fn with_poll_period(mut self, period: Duration) -> Self {
    self.poll_period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
    self
  }

  /// Sets the pause between source elements.
  #[must_use]
  pub fn with_source_pause(mut self, pause: Duration) -> Self {
    self.source_pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
    self
  }

  /// Polling period, at least one millisecond.
  pub fn poll_period(&self) -> Duration {
    Duration::from_millis(self.poll_period_ms.max(1))
  }

  /// Pause between source elements.
  pub fn source_pause(&self) -> Duration {
    Duration::from_millis(self.source_pause_ms)
  }
}

/// Sweep area settings applied by the stateful operators.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepAreaConfig {
  /// Expiration walk (default: lazy).
  pub reorganize_mode: ReorganizeMode,
  /// Fixed per-element size for memory accounting.
  pub object_size: Option<usize>,
}

impl SweepAreaConfig {
  /// Sets the expiration walk.
  #[must_use]
  pub fn with_reorganize_mode(mut self, mode: ReorganizeMode) -> Self {
    self.reorganize_mode = mode;
    self
  }

  /// Sets the per-element size.
  #[must_use]
  pub fn with_object_size(mut self, size: usize) -> Self {
    self.object_size = Some(size);
    self
  }
}

/// Root configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Heartbeat settings.
  pub heartbeat: HeartbeatConfig,
  /// Executor settings.
  pub executor: ExecutorConfig,
  /// Sweep area settings.
  pub sweep_area: SweepAreaConfig,
}

impl EngineConfig {
  /// Parses a JSON document.
  ///
  /// # Errors
  ///
  /// Returns [`ConfigError::Parse`] for malformed JSON or mistyped fields.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Reads and parses a JSON file.
  ///
  /// # Errors
  ///
  /// Returns [`ConfigError::Io`] if the file cannot be read and
  /// [`ConfigError::Parse`] if it does not parse.
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = Self::from_json_str(&text)?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
  }

  /// Replaces the heartbeat settings.
  #[must_use]
  pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
    self.heartbeat = heartbeat;
    self
  }

  /// Replaces the executor settings.
  #[must_use]
  pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
    self.executor = executor;
    self
  }

  /// Replaces the sweep area settings.
  #[must_use]
  pub fn with_sweep_area(mut self, sweep_area: SweepAreaConfig) -> Self {
    self.sweep_area = sweep_area;
    self
  }
}
