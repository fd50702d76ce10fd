//! # Config Test Suite

use crate::config::{EngineConfig, ExecutorConfig, HeartbeatConfig, HeartbeatPolicy, SweepAreaConfig};
use crate::error::ConfigError;
use crate::heartbeat::HeartbeatState;
use crate::sweep_area::ReorganizeMode;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_defaults() {
  let config = EngineConfig::default();
  assert_eq!(config.heartbeat.generator_delay_ms, 5000);
  assert!(!config.heartbeat.activate_on_open);
  assert_eq!(config.heartbeat.policy, HeartbeatPolicy::Always);
  assert_eq!(config.executor.poll_period_ms, 1000);
  assert_eq!(config.executor.source_pause(), Duration::ZERO);
  assert_eq!(config.sweep_area.reorganize_mode, ReorganizeMode::Lazy);
  assert_eq!(config.sweep_area.object_size, None);

  assert_eq!(EngineConfig::from_json_str("{}").unwrap(), config);
}

#[test]
fn test_partial_documents_keep_other_defaults() {
  let config = EngineConfig::from_json_str(
    r#"{
      "executor": { "poll_period_ms": 25 },
      "heartbeat": { "policy": { "min_last_hb_difference": 10 } },
      "sweep_area": { "reorganize_mode": "save_memory", "object_size": 64 }
    }"#,
  )
  .unwrap();
  assert_eq!(config.executor.poll_period(), Duration::from_millis(25));
  assert_eq!(config.executor.source_pause_ms, 0);
  assert_eq!(config.heartbeat.policy, HeartbeatPolicy::MinLastHbDifference(10));
  assert_eq!(config.heartbeat.generator_delay_ms, 5000);
  assert_eq!(config.sweep_area.reorganize_mode, ReorganizeMode::SaveMemory);
  assert_eq!(config.sweep_area.object_size, Some(64));
}

#[test]
fn test_malformed_json_is_a_parse_error() {
  assert!(matches!(EngineConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
  assert!(matches!(
    EngineConfig::from_json_str(r#"{ "executor": { "poll_period_ms": "soon" } }"#),
    Err(ConfigError::Parse(_))
  ));
}

#[test]
fn test_from_path() {
  let dir = tempfile::tempdir().unwrap();
  let missing = dir.path().join("missing.json");
  assert!(matches!(EngineConfig::from_path(&missing), Err(ConfigError::Io(_))));

  let mut file = tempfile::NamedTempFile::new().unwrap();
  file
    .write_all(br#"{ "heartbeat": { "activate_on_open": true } }"#)
    .unwrap();

  let config = EngineConfig::from_path(file.path()).unwrap();
  assert!(config.heartbeat.activate_on_open);
}

#[test]
fn test_builders() {
  let config = EngineConfig::default()
    .with_heartbeat(
      HeartbeatConfig::default()
        .with_generator_delay(Duration::from_millis(20))
        .with_activate_on_open(true)
        .with_policy(HeartbeatPolicy::EveryNth(2)),
    )
    .with_executor(ExecutorConfig::default().with_poll_period(Duration::ZERO))
    .with_sweep_area(SweepAreaConfig::default().with_object_size(8));

  assert_eq!(config.heartbeat.generator_delay_ms, 20);
  assert_eq!(config.executor.poll_period(), Duration::from_millis(1));
  assert_eq!(config.sweep_area.object_size, Some(8));

  let json = serde_json::to_string(&config).unwrap();
  assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
}

#[test]
fn test_policy_builds_matching_predicate() {
  let state = HeartbeatState {
    latest: &[],
    min_timestamp: 1,
    last_heartbeat: None,
  };
  let mut every_second = HeartbeatPolicy::EveryNth(2).build();
  assert!(!every_second.should_emit(&state));
  assert!(every_second.should_emit(&state));

  let mut always = HeartbeatPolicy::Always.build();
  assert!(always.should_emit(&state));
}
