//! Public-surface laws of the configuration records.

mod common;

use common::count_warns_containing;
use flowerpower::{
    CachePolicy, ExecutorConfig, ExecutorKind, FailureClass, LogLevel, RetryPolicy, RunConfig,
    RunOverrides,
};

#[test]
fn copy_then_empty_update_equals_the_original() {
    let original = RunConfig::builder()
        .with_input("x", serde_json::json!(2))
        .with_final_vars(["y", "z"])
        .with_executor(ExecutorKind::Threadpool)
        .with_cache(CachePolicy::Flag(true))
        .with_log_level(LogLevel::Info)
        .with_on_success(std::sync::Arc::new(|_: &flowerpower::RunResult| {}))
        .build()
        .unwrap();
    let mut copy = original.clone();
    copy.update(RunOverrides::default());
    assert_eq!(copy, original);
}

#[test]
fn builder_fields_survive_build() {
    let retry = RetryPolicy {
        max_retries: Some(4),
        retry_delay: Some(0.25),
        jitter_factor: Some(0.5),
        retry_exceptions: Some(vec![FailureClass::Timeout]),
    };
    let cfg = RunConfig::builder()
        .with_final_vars(["out"])
        .with_executor(ExecutorConfig {
            kind: Some(ExecutorKind::Processpool),
            max_workers: Some(3),
            num_cpus: None,
        })
        .with_retry(retry.clone())
        .with_log_level(LogLevel::Critical)
        .with_reload(true)
        .build()
        .unwrap();
    assert_eq!(cfg.final_vars, Some(vec!["out".to_string()]));
    assert_eq!(cfg.executor.kind(), ExecutorKind::Processpool);
    assert_eq!(cfg.executor.max_workers, Some(3));
    assert_eq!(cfg.retry, retry);
    assert_eq!(cfg.log_level, Some(LogLevel::Critical));
    assert!(cfg.reload());
}

#[test]
fn builder_rejects_invalid_values() {
    let err = RunConfig::builder()
        .with_executor(ExecutorConfig {
            kind: Some(ExecutorKind::Threadpool),
            max_workers: Some(0),
            num_cpus: None,
        })
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("max_workers"));

    let err = RunConfig::builder()
        .with_retry(RetryPolicy {
            jitter_factor: Some(2.0),
            ..RetryPolicy::default()
        })
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("jitter_factor"));
}

#[test]
fn executor_accepts_string_and_mapping_forms() {
    let from_string: ExecutorConfig = serde_yaml::from_str("dask").unwrap();
    assert_eq!(from_string.kind(), ExecutorKind::Dask);

    let from_mapping: ExecutorConfig =
        serde_yaml::from_str("{type: threadpool, max_workers: 12, num_cpus: 2}").unwrap();
    assert_eq!(from_mapping.kind(), ExecutorKind::Threadpool);
    assert_eq!(from_mapping.max_workers, Some(12));
    assert_eq!(from_mapping.num_cpus, Some(2));
}

#[test]
fn run_config_serde_round_trip_preserves_set_fields() {
    let cfg = RunConfig::builder()
        .with_input("region", serde_json::json!("emea"))
        .with_final_vars(["a"])
        .with_executor(ExecutorKind::Threadpool)
        .with_log_level(LogLevel::Debug)
        .build()
        .unwrap();
    let yaml = serde_yaml::to_string(&cfg).unwrap();
    let back: RunConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, cfg);
    // Unset fields stay unset, they are not serialized as defaults.
    assert!(!yaml.contains("retry"));
    assert!(!yaml.contains("reload"));
}

// The dedupe set for deprecation notices is process-global, so every
// legacy-field construction in this binary lives in this one test.
#[test]
#[allow(deprecated)]
fn legacy_fields_warn_once_per_process_and_normalize() {
    let mut first = None;
    let warns = count_warns_containing("deprecated", || {
        first = Some(
            RunConfig::builder()
                .with_max_retries(3)
                .with_retry_delay(2.0)
                .build()
                .unwrap(),
        );
    });
    assert_eq!(warns, 2, "one notice per legacy field on first use");

    let first = first.unwrap();
    assert_eq!(first.retry.max_retries, Some(3));
    assert_eq!(first.retry.retry_delay, Some(2.0));
    assert_eq!(first.retry.jitter_factor, None);
    assert_eq!(first.retry.retry_exceptions, None);

    let warns = count_warns_containing("deprecated", || {
        let again = RunConfig::builder()
            .with_max_retries(5)
            .with_retry_delay(1.0)
            .build()
            .unwrap();
        assert_eq!(again.retry.max_retries, Some(5));
    });
    assert_eq!(warns, 0, "notices are deduped per process");
}

#[test]
fn update_merges_nested_mappings_and_replaces_scalars() {
    let mut cfg = RunConfig::builder()
        .with_input("params", serde_json::json!({"a": 1, "b": 2}))
        .with_log_level(LogLevel::Info)
        .build()
        .unwrap();
    let mut inputs = serde_json::Map::new();
    inputs.insert("params".to_string(), serde_json::json!({"b": 9}));
    cfg.update(RunOverrides {
        inputs: Some(inputs),
        log_level: Some(LogLevel::Error),
        ..RunOverrides::default()
    });
    assert_eq!(
        cfg.inputs.as_ref().unwrap()["params"],
        serde_json::json!({"a": 1, "b": 9})
    );
    assert_eq!(cfg.log_level, Some(LogLevel::Error));
}

#[test]
fn final_vars_none_and_empty_are_distinct() {
    let unset = RunConfig::default();
    assert_eq!(unset.final_vars, None);

    let empty = RunConfig::builder()
        .with_final_vars(Vec::<String>::new())
        .build()
        .unwrap();
    assert_eq!(empty.final_vars, Some(Vec::new()));
    assert_ne!(unset, empty);
}
