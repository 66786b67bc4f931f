//! Run-scoped adapters.
//!
//! An adapter is a lifetime-scoped collaborator (tracker, tracer, progress
//! bar) that observes a run. Built-in adapters are constructed from the
//! merged per-adapter config when their `with_adapter` flag is on; custom
//! instances supplied by the caller are appended afterwards in insertion
//! order. Construction failures abort the run before any attempt executes.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

use crate::config::model::JsonMap;
use crate::config::{AdapterConfigSet, WithAdapterSet};
use crate::constants;
use crate::error::Error;

/// Observer of a run's attempts, owned by the execution context.
///
/// Hook defaults are no-ops; implementations override what they care about.
/// `shutdown` runs once at context release, in reverse construction order.
pub trait Adapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Called before each execution attempt.
    fn on_attempt_start(&self, pipeline: &str, attempt: u32) {
        let _ = (pipeline, attempt);
    }

    /// Called after each execution attempt.
    fn on_attempt_end(&self, pipeline: &str, attempt: u32, succeeded: bool) {
        let _ = (pipeline, attempt, succeeded);
    }

    /// Teardown at context release.
    ///
    /// # Errors
    ///
    /// Failures are logged by the context and never mask the run outcome.
    fn shutdown(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn required_str(cfg: &JsonMap, adapter: &str, key: &str) -> Result<String, Error> {
    cfg.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::adapter(adapter, format!("missing required '{key}'")))
}

fn optional_str(cfg: &JsonMap, key: &str) -> Option<String> {
    cfg.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Reports run lifecycle events to an experiment tracker service.
#[derive(Debug)]
pub struct TrackerAdapter {
    project_id: String,
    endpoint: Option<String>,
    tags: JsonMap,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl TrackerAdapter {
    /// # Errors
    ///
    /// Returns an `Adapter` error when `project_id` is missing.
    pub fn from_config(cfg: &JsonMap) -> Result<Self, Error> {
        Ok(Self {
            project_id: required_str(cfg, constants::ADAPTER_TRACKER, "project_id")?,
            endpoint: optional_str(cfg, "endpoint"),
            tags: cfg
                .get("tags")
                .and_then(serde_json::Value::as_object)
                .cloned()
                .unwrap_or_default(),
            started_at: Mutex::new(None),
        })
    }
}

impl Adapter for TrackerAdapter {
    fn name(&self) -> &str {
        constants::ADAPTER_TRACKER
    }

    fn on_attempt_start(&self, pipeline: &str, attempt: u32) {
        let now = Utc::now();
        if let Ok(mut started) = self.started_at.lock() {
            started.get_or_insert(now);
        }
        tracing::info!(
            pipeline,
            attempt,
            project_id = %self.project_id,
            endpoint = self.endpoint.as_deref(),
            tags = self.tags.len(),
            started_at = %now.to_rfc3339(),
            "tracker: attempt started"
        );
    }

    fn on_attempt_end(&self, pipeline: &str, attempt: u32, succeeded: bool) {
        tracing::info!(
            pipeline,
            attempt,
            succeeded,
            project_id = %self.project_id,
            "tracker: attempt finished"
        );
    }

    fn shutdown(&self) -> Result<(), Error> {
        let started = self.started_at.lock().ok().and_then(|s| *s);
        tracing::debug!(
            project_id = %self.project_id,
            started_at = ?started,
            "tracker: flushed"
        );
        Ok(())
    }
}

/// Emits spans for run attempts through the `tracing` bridge.
#[derive(Debug)]
pub struct OpenTelemetryAdapter {
    service_name: String,
    endpoint: Option<String>,
}

impl OpenTelemetryAdapter {
    /// # Errors
    ///
    /// Returns an `Adapter` error when `endpoint` is present but empty.
    pub fn from_config(cfg: &JsonMap) -> Result<Self, Error> {
        let endpoint = optional_str(cfg, "endpoint");
        if endpoint.as_deref() == Some("") {
            return Err(Error::adapter(
                constants::ADAPTER_OPENTELEMETRY,
                "'endpoint' must not be empty",
            ));
        }
        Ok(Self {
            service_name: optional_str(cfg, "service_name")
                .unwrap_or_else(|| "flowerpower".to_string()),
            endpoint,
        })
    }
}

impl Adapter for OpenTelemetryAdapter {
    fn name(&self) -> &str {
        constants::ADAPTER_OPENTELEMETRY
    }

    fn on_attempt_start(&self, pipeline: &str, attempt: u32) {
        tracing::debug!(
            pipeline,
            attempt,
            service = %self.service_name,
            endpoint = self.endpoint.as_deref(),
            "otel: span opened"
        );
    }

    fn on_attempt_end(&self, pipeline: &str, attempt: u32, succeeded: bool) {
        tracing::debug!(pipeline, attempt, succeeded, "otel: span closed");
    }
}

/// Logs coarse progress for interactive consumers.
#[derive(Debug)]
pub struct ProgressBarAdapter;

impl ProgressBarAdapter {
    #[allow(clippy::unnecessary_wraps)]
    pub fn from_config(_cfg: &JsonMap) -> Result<Self, Error> {
        Ok(Self)
    }
}

impl Adapter for ProgressBarAdapter {
    fn name(&self) -> &str {
        constants::ADAPTER_PROGRESSBAR
    }

    fn on_attempt_start(&self, pipeline: &str, attempt: u32) {
        tracing::info!(pipeline, attempt, "progress: running");
    }

    fn on_attempt_end(&self, pipeline: &str, attempt: u32, succeeded: bool) {
        tracing::info!(pipeline, attempt, succeeded, "progress: done");
    }
}

/// Records run metadata against an MLflow tracking server.
#[derive(Debug)]
pub struct MlflowAdapter {
    tracking_uri: String,
    experiment: Option<String>,
}

impl MlflowAdapter {
    /// # Errors
    ///
    /// Returns an `Adapter` error when `tracking_uri` has an unsupported
    /// scheme.
    pub fn from_config(cfg: &JsonMap) -> Result<Self, Error> {
        let tracking_uri = optional_str(cfg, "tracking_uri")
            .unwrap_or_else(|| "http://127.0.0.1:5000".to_string());
        if !["http://", "https://", "file:"]
            .iter()
            .any(|scheme| tracking_uri.starts_with(scheme))
        {
            return Err(Error::adapter(
                constants::ADAPTER_MLFLOW,
                format!("unsupported tracking_uri '{tracking_uri}'"),
            ));
        }
        Ok(Self {
            tracking_uri,
            experiment: optional_str(cfg, "experiment"),
        })
    }
}

impl Adapter for MlflowAdapter {
    fn name(&self) -> &str {
        constants::ADAPTER_MLFLOW
    }

    fn on_attempt_end(&self, pipeline: &str, attempt: u32, succeeded: bool) {
        tracing::info!(
            pipeline,
            attempt,
            succeeded,
            tracking_uri = %self.tracking_uri,
            experiment = self.experiment.as_deref(),
            "mlflow: attempt recorded"
        );
    }
}

/// Surfaces per-node telemetry from ray workers.
#[derive(Debug)]
pub struct RayAdapter {
    address: Option<String>,
}

impl RayAdapter {
    #[allow(clippy::unnecessary_wraps)]
    pub fn from_config(cfg: &JsonMap) -> Result<Self, Error> {
        Ok(Self {
            address: optional_str(cfg, "address"),
        })
    }
}

impl Adapter for RayAdapter {
    fn name(&self) -> &str {
        constants::ADAPTER_RAY
    }

    fn on_attempt_start(&self, pipeline: &str, attempt: u32) {
        tracing::debug!(
            pipeline,
            attempt,
            address = self.address.as_deref(),
            "ray: attempt observed"
        );
    }
}

fn build_builtin(key: &str, cfg: &JsonMap) -> Result<Arc<dyn Adapter>, Error> {
    match key {
        constants::ADAPTER_TRACKER => Ok(Arc::new(TrackerAdapter::from_config(cfg)?)),
        constants::ADAPTER_OPENTELEMETRY => {
            Ok(Arc::new(OpenTelemetryAdapter::from_config(cfg)?))
        }
        constants::ADAPTER_PROGRESSBAR => Ok(Arc::new(ProgressBarAdapter::from_config(cfg)?)),
        constants::ADAPTER_MLFLOW => Ok(Arc::new(MlflowAdapter::from_config(cfg)?)),
        constants::ADAPTER_RAY => Ok(Arc::new(RayAdapter::from_config(cfg)?)),
        other => Err(Error::adapter(
            other,
            "no built-in or custom adapter available for this key",
        )),
    }
}

fn release_partial(adapters: &[Arc<dyn Adapter>]) {
    for adapter in adapters.iter().rev() {
        if let Err(e) = adapter.shutdown() {
            tracing::warn!(adapter = adapter.name(), error = %e, "adapter teardown failed");
        }
    }
}

/// Resolves the adapter set for one run.
///
/// # Errors
///
/// Returns an `Adapter` error when a flagged adapter cannot be built; any
/// adapters already initialized are released first.
pub(crate) fn build_adapters(
    with_adapter: &WithAdapterSet,
    pipeline_cfg: &AdapterConfigSet,
    project_cfg: &AdapterConfigSet,
    custom: &IndexMap<String, Arc<dyn Adapter>>,
) -> Result<Vec<Arc<dyn Adapter>>, Error> {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();
    for key in with_adapter.enabled_keys() {
        if custom.contains_key(key) {
            // The caller supplied an instance for this key; it is appended
            // with the other customs below.
            continue;
        }
        let cfg = pipeline_cfg.merged_entry(key, project_cfg);
        match build_builtin(key, &cfg) {
            Ok(adapter) => adapters.push(adapter),
            Err(e) => {
                release_partial(&adapters);
                return Err(e);
            }
        }
    }
    for adapter in custom.values() {
        adapters.push(Arc::clone(adapter));
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(json: serde_json::Value) -> JsonMap {
        json.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn tracker_requires_a_project_id() {
        let err = TrackerAdapter::from_config(&JsonMap::new()).unwrap_err();
        assert!(err.to_string().contains("project_id"));
        assert!(TrackerAdapter::from_config(&cfg(serde_json::json!({"project_id": "p1"}))).is_ok());
    }

    #[test]
    fn mlflow_rejects_unsupported_schemes() {
        let err = MlflowAdapter::from_config(&cfg(serde_json::json!({
            "tracking_uri": "ftp://mlflow"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("ftp://mlflow"));
    }

    #[test]
    fn build_respects_flag_insertion_order() {
        let flags: WithAdapterSet = [("progressbar", true), ("mlflow", true), ("ray", false)]
            .into_iter()
            .collect();
        let adapters = build_adapters(
            &flags,
            &AdapterConfigSet::default(),
            &AdapterConfigSet::default(),
            &IndexMap::new(),
        )
        .unwrap();
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["progressbar", "mlflow"]);
    }

    #[test]
    fn customs_append_after_builtins_in_insertion_order() {
        #[derive(Debug)]
        struct Named(&'static str);
        impl Adapter for Named {
            fn name(&self) -> &str {
                self.0
            }
        }
        let flags: WithAdapterSet = [("progressbar", true)].into_iter().collect();
        let mut custom: IndexMap<String, Arc<dyn Adapter>> = IndexMap::new();
        custom.insert("audit".to_string(), Arc::new(Named("audit")));
        custom.insert("lineage".to_string(), Arc::new(Named("lineage")));
        let adapters = build_adapters(
            &flags,
            &AdapterConfigSet::default(),
            &AdapterConfigSet::default(),
            &custom,
        )
        .unwrap();
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["progressbar", "audit", "lineage"]);
    }

    #[test]
    fn flagged_unknown_key_without_custom_instance_fails() {
        let flags: WithAdapterSet = [("lineage", true)].into_iter().collect();
        let err = build_adapters(
            &flags,
            &AdapterConfigSet::default(),
            &AdapterConfigSet::default(),
            &IndexMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Adapter);
    }

    #[test]
    fn flagged_key_with_custom_instance_is_not_built_twice() {
        #[derive(Debug)]
        struct Named(&'static str);
        impl Adapter for Named {
            fn name(&self) -> &str {
                self.0
            }
        }
        let flags: WithAdapterSet = [("lineage", true)].into_iter().collect();
        let mut custom: IndexMap<String, Arc<dyn Adapter>> = IndexMap::new();
        custom.insert("lineage".to_string(), Arc::new(Named("lineage")));
        let adapters = build_adapters(
            &flags,
            &AdapterConfigSet::default(),
            &AdapterConfigSet::default(),
            &custom,
        )
        .unwrap();
        assert_eq!(adapters.len(), 1);
    }

    #[test]
    fn failed_build_releases_already_initialized_adapters() {
        // tracker without project_id fails after progressbar was built; the
        // call must not leak a half-initialized set.
        let flags: WithAdapterSet = [("progressbar", true), ("tracker", true)]
            .into_iter()
            .collect();
        let err = build_adapters(
            &flags,
            &AdapterConfigSet::default(),
            &AdapterConfigSet::default(),
            &IndexMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Adapter);
    }
}
