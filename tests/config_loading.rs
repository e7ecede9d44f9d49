#![cfg(test)]

use faultline_core::catalog::FaultCatalog;
use faultline_core::config::EngineConfig;
use faultline_core::context::RequestOrigin;
use faultline_core::error::ConfigError;
use faultline_core::report::RunStatus;
use faultline_core::search::IterationPlan;
use faultline_core::test_utils::{engine_err, invoke, invoke_text};
use faultline_core::types::{RequestId, SearchStrategy, StoragePolicy, ValueKind};
use faultline_core::{CallSite, FaultEngine, Payload};
use std::io::Write;
use tempfile::NamedTempFile;

const ANALYSIS: &str = r#"{
  "grpc.exceptions": {
    "pattern": "(.*Service/.*)",
    "exceptions": [{ "name": "StatusRuntimeException", "metadata": { "code": "UNAVAILABLE" } }]
  },
  "redis.byzantine": {
    "pattern": "RedisStringCommands.get",
    "byzantines": [{ "type": "string", "value": null }]
  }
}"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

#[test]
fn engine_runs_from_files_on_disk() {
    let config_file = write_temp(r#"{ "max_iterations": 10, "storage_policy": "shared_global" }"#);
    let catalog_file = write_temp(ANALYSIS);

    let config = EngineConfig::from_path(config_file.path()).unwrap();
    assert_eq!(config.max_iterations, 10);
    assert_eq!(config.storage_policy, StoragePolicy::SharedGlobal);
    assert!(config.digest_components, "unset fields keep their defaults");

    let catalog = FaultCatalog::from_path(catalog_file.path()).unwrap();
    assert_eq!(catalog.entries().len(), 2);

    let engine = FaultEngine::new(config, catalog).unwrap();
    let report = engine
        .explore(|engine: &FaultEngine, _plan: &IterationPlan| {
            let id = RequestId::new();
            engine.begin_request(id, RequestOrigin::new("frontend")).map_err(engine_err)?;
            let user = invoke_text(engine, id, &CallSite::new("frontend.rs:1", "users.UserService/GetUser"), "alice");
            let cached = invoke(
                engine,
                id,
                &CallSite::new("frontend.rs:2", "io.lettuce.RedisStringCommands.get"),
                ValueKind::String,
                || Ok(Payload::from("cached")),
            );
            engine.end_request(id).map_err(engine_err)?;
            user?;
            cached.map(|_| ())
        })
        .unwrap();

    assert_eq!(report.status, RunStatus::Exhausted);
    // Reference, the exception on the user call, the null on the cache call.
    assert_eq!(report.iterations.len(), 3);
    assert_eq!(report.failed_iterations().count(), 1, "a null cache value does not fail the program");
}

#[test]
fn single_target_strategy_loads_from_json() {
    let config = EngineConfig::from_json_str(r#"{ "search_strategy": { "single_target": "users.UserService/GetUser" } }"#)
        .unwrap();
    assert_eq!(
        config.search_strategy,
        SearchStrategy::SingleTarget("users.UserService/GetUser".to_string())
    );
}

#[test]
fn invalid_config_is_rejected() {
    assert!(matches!(
        EngineConfig::from_json_str(r#"{ "max_iterations": 0 }"#),
        Err(ConfigError::Malformed(_))
    ));
    assert!(matches!(
        EngineConfig::from_json_str(r#"{ "search_strategy": { "single_target": "" } }"#),
        Err(ConfigError::Malformed(_))
    ));
}

#[test]
fn missing_files_surface_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("analysis.json");
    assert!(matches!(FaultCatalog::from_path(&missing), Err(ConfigError::Io(_))));
    assert!(matches!(EngineConfig::from_path(&missing), Err(ConfigError::Io(_))));
}

#[test]
fn bad_pattern_in_file_names_the_rule() {
    let file = write_temp(r#"{ "broken": { "pattern": "(unclosed", "exceptions": [{ "name": "X" }] } }"#);
    match FaultCatalog::from_path(file.path()) {
        Err(ConfigError::InvalidPattern { rule, .. }) => assert_eq!(rule, "broken"),
        other => panic!("expected invalid pattern, got {other:?}"),
    }
}
