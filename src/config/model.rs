//! Typed configuration records for pipeline runs.
//!
//! Every field an upper precedence layer may leave unset is `Option` (or an
//! all-`Option` record); accessors supply the hard-coded defaults at
//! resolution time, so layer merging never has to guess whether a value was
//! set explicitly or is just a default.

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};

use crate::config::loader::deep_merge;
use crate::constants;
use crate::context::adapter::Adapter;
use crate::engine::{FailureClass, RunResult};
use crate::error::Error;

pub(crate) type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Callback invoked once after a successful run, after context release.
pub type OnSuccess = Arc<dyn Fn(&RunResult) + Send + Sync>;
/// Callback invoked once after the final failure, after context release.
pub type OnFailure = Arc<dyn Fn(&Error) + Send + Sync>;

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

/// Per-run log level override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Parses a level name case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for names outside
    /// `{DEBUG, INFO, WARNING, ERROR, CRITICAL}`.
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(Error::invalid_config(format!(
                "invalid log level '{name}', expected one of DEBUG, INFO, WARNING, ERROR, CRITICAL"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// The `tracing` level this override admits. CRITICAL collapses to
    /// ERROR, the most severe level the ecosystem knows.
    #[must_use]
    pub const fn as_tracing_level(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Critical => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::parse(&name).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// The parallelism substrate a run hands to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Synchronous,
    Threadpool,
    Processpool,
    Ray,
    Dask,
}

impl ExecutorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synchronous => "synchronous",
            Self::Threadpool => "threadpool",
            Self::Processpool => "processpool",
            Self::Ray => "ray",
            Self::Dask => "dask",
        }
    }

    /// Parses an executor kind name.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for names outside the allowed set.
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "synchronous" => Ok(Self::Synchronous),
            "threadpool" => Ok(Self::Threadpool),
            "processpool" => Ok(Self::Processpool),
            "ray" => Ok(Self::Ray),
            "dask" => Ok(Self::Dask),
            _ => Err(Error::invalid_config(format!(
                "unknown executor type '{name}', expected one of \
                 synchronous, threadpool, processpool, ray, dask"
            ))),
        }
    }

    /// Distributed kinds honor `num_cpus`; the rest ignore it.
    #[must_use]
    pub const fn is_distributed(self) -> bool {
        matches!(self, Self::Ray | Self::Dask)
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executor selection plus sizing hints.
///
/// Accepted from YAML either as a bare string (`executor: threadpool`) or as
/// a record (`executor: {type: threadpool, max_workers: 8}`); both funnel
/// through the same representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ExecutorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<usize>,
}

impl ExecutorConfig {
    #[must_use]
    pub const fn from_kind(kind: ExecutorKind) -> Self {
        Self {
            kind: Some(kind),
            max_workers: None,
            num_cpus: None,
        }
    }

    /// The effective kind, defaulting to `synchronous`.
    #[must_use]
    pub fn kind(&self) -> ExecutorKind {
        self.kind.unwrap_or(ExecutorKind::Synchronous)
    }

    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.kind.is_none() && self.max_workers.is_none() && self.num_cpus.is_none()
    }

    pub(crate) fn merge_from(&mut self, higher: &Self) {
        if higher.kind.is_some() {
            self.kind = higher.kind;
        }
        if higher.max_workers.is_some() {
            self.max_workers = higher.max_workers;
        }
        if higher.num_cpus.is_some() {
            self.num_cpus = higher.num_cpus;
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_workers == Some(0) {
            return Err(Error::invalid_config(
                "executor.max_workers must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl From<ExecutorKind> for ExecutorConfig {
    fn from(kind: ExecutorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl TryFrom<&str> for ExecutorConfig {
    type Error = Error;

    fn try_from(name: &str) -> Result<Self, Error> {
        ExecutorKind::parse(name).map(Self::from_kind)
    }
}

impl<'de> Deserialize<'de> for ExecutorConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Kind(ExecutorKind),
            Record {
                #[serde(rename = "type", default)]
                kind: Option<ExecutorKind>,
                #[serde(default)]
                max_workers: Option<usize>,
                #[serde(default)]
                num_cpus: Option<usize>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Kind(kind) => Ok(Self::from_kind(kind)),
            Repr::Record {
                kind,
                max_workers,
                num_cpus,
            } => Ok(Self {
                kind,
                max_workers,
                num_cpus,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Boolean flags per adapter key, insertion-ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithAdapterSet {
    flags: IndexMap<String, bool>,
}

impl WithAdapterSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    #[must_use]
    pub fn is_enabled(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, enabled: bool) -> &mut Self {
        self.flags.insert(key.into(), enabled);
        self
    }

    /// Keys flagged on, in insertion order.
    pub fn enabled_keys(&self) -> impl Iterator<Item = &str> {
        self.flags
            .iter()
            .filter(|(_, on)| **on)
            .map(|(key, _)| key.as_str())
    }

    pub(crate) fn merge_from(&mut self, higher: &Self) {
        for (key, on) in &higher.flags {
            self.flags.insert(key.clone(), *on);
        }
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for WithAdapterSet {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(|(k, on)| (k.into(), on)).collect(),
        }
    }
}

/// Per-adapter configuration mappings, keyed by adapter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterConfigSet {
    entries: IndexMap<String, JsonMap>,
}

impl AdapterConfigSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonMap> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, cfg: JsonMap) -> &mut Self {
        self.entries.insert(key.into(), cfg);
        self
    }

    /// The effective configuration for one adapter: this set's entry merged
    /// over the `base` set's entry.
    #[must_use]
    pub fn merged_entry(&self, key: &str, base: &Self) -> JsonMap {
        let mut effective = serde_json::Value::Object(base.get(key).cloned().unwrap_or_default());
        if let Some(over) = self.get(key) {
            deep_merge(&mut effective, serde_json::Value::Object(over.clone()));
        }
        match effective {
            serde_json::Value::Object(map) => map,
            _ => JsonMap::new(),
        }
    }

    pub(crate) fn merge_from(&mut self, higher: &Self) {
        for (key, cfg) in &higher.entries {
            match self.entries.get_mut(key) {
                Some(existing) => {
                    let mut merged = serde_json::Value::Object(std::mem::take(existing));
                    deep_merge(&mut merged, serde_json::Value::Object(cfg.clone()));
                    if let serde_json::Value::Object(map) = merged {
                        *existing = map;
                    }
                }
                None => {
                    self.entries.insert(key.clone(), cfg.clone());
                }
            }
        }
    }
}

impl<K: Into<String>> FromIterator<(K, JsonMap)> for AdapterConfigSet {
    fn from_iter<I: IntoIterator<Item = (K, JsonMap)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Attempt count, delay, jitter, and failure-class predicate governing
/// re-execution on engine failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_exceptions: Option<Vec<FailureClass>>,
}

impl RetryPolicy {
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.max_retries.is_none()
            && self.retry_delay.is_none()
            && self.jitter_factor.is_none()
            && self.retry_exceptions.is_none()
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(constants::DEFAULT_MAX_RETRIES)
    }

    #[must_use]
    pub fn retry_delay_secs(&self) -> f64 {
        self.retry_delay
            .unwrap_or(constants::DEFAULT_RETRY_DELAY_SECS)
    }

    #[must_use]
    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
            .unwrap_or(constants::DEFAULT_JITTER_FACTOR)
    }

    /// Whether a raised failure class is retryable under this policy.
    ///
    /// An unset list defaults to the base class (retry everything); an
    /// explicitly empty list retries nothing.
    #[must_use]
    pub fn matches(&self, raised: FailureClass) -> bool {
        self.retry_exceptions.as_ref().map_or(true, |classes| {
            classes.iter().any(|class| class.matches(raised))
        })
    }

    pub(crate) fn merge_from(&mut self, higher: &Self) {
        if higher.max_retries.is_some() {
            self.max_retries = higher.max_retries;
        }
        if higher.retry_delay.is_some() {
            self.retry_delay = higher.retry_delay;
        }
        if higher.jitter_factor.is_some() {
            self.jitter_factor = higher.jitter_factor;
        }
        // Exception lists replace, they never union.
        if higher.retry_exceptions.is_some() {
            self.retry_exceptions.clone_from(&higher.retry_exceptions);
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.retry_delay.is_some_and(|d| !d.is_finite() || d < 0.0) {
            return Err(Error::invalid_config(
                "retry.retry_delay must be a non-negative number",
            ));
        }
        if self
            .jitter_factor
            .is_some_and(|j| !j.is_finite() || !(0.0..=1.0).contains(&j))
        {
            return Err(Error::invalid_config(
                "retry.jitter_factor must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Opaque cache policy forwarded to the engine: a simple on/off flag or an
/// engine-defined option mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachePolicy {
    Flag(bool),
    Options(JsonMap),
}

// ---------------------------------------------------------------------------
// Deprecation notices
// ---------------------------------------------------------------------------

fn noticed_deprecations() -> &'static Mutex<BTreeSet<&'static str>> {
    static NOTICED: OnceLock<Mutex<BTreeSet<&'static str>>> = OnceLock::new();
    NOTICED.get_or_init(|| Mutex::new(BTreeSet::new()))
}

/// Emits a deprecation notice for a legacy top-level retry field, at most
/// once per field per process.
fn note_deprecated(field: &'static str) {
    let newly = noticed_deprecations()
        .lock()
        .map(|mut seen| seen.insert(field))
        .unwrap_or(false);
    if newly {
        tracing::warn!(
            field,
            "top-level '{field}' is deprecated, set retry.{field} instead"
        );
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Configuration for one pipeline run.
///
/// Unset fields inherit from lower precedence layers; see the loader for the
/// full precedence order. Legacy top-level retry fields are accepted (from
/// YAML and from the builder) and folded into [`RetryPolicy`] with a
/// deprecation notice.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_vars: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
    #[serde(default, skip_serializing_if = "ExecutorConfig::is_unset")]
    pub executor: ExecutorConfig,
    #[serde(default, skip_serializing_if = "WithAdapterSet::is_empty")]
    pub with_adapter: WithAdapterSet,
    #[serde(default, skip_serializing_if = "AdapterConfigSet::is_empty")]
    pub pipeline_adapter_cfg: AdapterConfigSet,
    #[serde(default, skip_serializing_if = "AdapterConfigSet::is_empty")]
    pub project_adapter_cfg: AdapterConfigSet,
    /// Caller-supplied adapter instances, appended after the built-ins in
    /// insertion order. Never read from files.
    #[serde(skip)]
    pub adapter: IndexMap<String, Arc<dyn Adapter>>,
    #[serde(default, skip_serializing_if = "RetryPolicy::is_unset")]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload: Option<bool>,
    #[serde(skip)]
    pub on_success: Option<OnSuccess>,
    #[serde(skip)]
    pub on_failure: Option<OnFailure>,

    // Legacy top-level retry fields, folded into `retry` by
    // `normalize_legacy`.
    #[serde(default, rename = "max_retries", skip_serializing)]
    legacy_max_retries: Option<u32>,
    #[serde(default, rename = "retry_delay", skip_serializing)]
    legacy_retry_delay: Option<f64>,
    #[serde(default, rename = "jitter_factor", skip_serializing)]
    legacy_jitter_factor: Option<f64>,
    #[serde(default, rename = "retry_exceptions", skip_serializing)]
    legacy_retry_exceptions: Option<Vec<FailureClass>>,
}

impl RunConfig {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Whether a forced module re-import was requested.
    #[must_use]
    pub fn reload(&self) -> bool {
        self.reload.unwrap_or(false)
    }

    /// Applies call-site overrides in place and returns `self` for fluent
    /// chaining. Nested mappings deep-merge; everything else replaces.
    pub fn update(&mut self, patch: RunOverrides) -> &mut Self {
        self.apply_overrides(patch);
        self
    }

    /// Folds legacy top-level retry fields into `retry`, emitting one
    /// deduped deprecation notice per field per process. Explicit nested
    /// values win over legacy ones.
    pub(crate) fn normalize_legacy(&mut self) {
        if let Some(v) = self.legacy_max_retries.take() {
            note_deprecated("max_retries");
            self.retry.max_retries.get_or_insert(v);
        }
        if let Some(v) = self.legacy_retry_delay.take() {
            note_deprecated("retry_delay");
            self.retry.retry_delay.get_or_insert(v);
        }
        if let Some(v) = self.legacy_jitter_factor.take() {
            note_deprecated("jitter_factor");
            self.retry.jitter_factor.get_or_insert(v);
        }
        if let Some(v) = self.legacy_retry_exceptions.take() {
            note_deprecated("retry_exceptions");
            self.retry.retry_exceptions.get_or_insert(v);
        }
    }

    /// Overlays a higher-precedence config onto this one.
    pub(crate) fn merge_from(&mut self, higher: &Self) {
        merge_json_map(&mut self.inputs, higher.inputs.as_ref());
        merge_json_map(&mut self.config, higher.config.as_ref());
        if higher.final_vars.is_some() {
            self.final_vars.clone_from(&higher.final_vars);
        }
        if higher.cache.is_some() {
            self.cache.clone_from(&higher.cache);
        }
        self.executor.merge_from(&higher.executor);
        self.with_adapter.merge_from(&higher.with_adapter);
        self.pipeline_adapter_cfg
            .merge_from(&higher.pipeline_adapter_cfg);
        self.project_adapter_cfg
            .merge_from(&higher.project_adapter_cfg);
        for (name, adapter) in &higher.adapter {
            self.adapter.insert(name.clone(), Arc::clone(adapter));
        }
        self.retry.merge_from(&higher.retry);
        if higher.log_level.is_some() {
            self.log_level = higher.log_level;
        }
        if higher.reload.is_some() {
            self.reload = higher.reload;
        }
        if higher.on_success.is_some() {
            self.on_success.clone_from(&higher.on_success);
        }
        if higher.on_failure.is_some() {
            self.on_failure.clone_from(&higher.on_failure);
        }
    }

    /// Applies a call-site override patch, the highest precedence layer.
    pub(crate) fn apply_overrides(&mut self, patch: RunOverrides) {
        merge_json_map(&mut self.inputs, patch.inputs.as_ref());
        merge_json_map(&mut self.config, patch.config.as_ref());
        if patch.final_vars.is_some() {
            self.final_vars = patch.final_vars;
        }
        if patch.cache.is_some() {
            self.cache = patch.cache;
        }
        if let Some(executor) = patch.executor {
            self.executor.merge_from(&executor);
        }
        if let Some(with_adapter) = patch.with_adapter {
            self.with_adapter.merge_from(&with_adapter);
        }
        if let Some(cfg) = patch.pipeline_adapter_cfg {
            self.pipeline_adapter_cfg.merge_from(&cfg);
        }
        if let Some(cfg) = patch.project_adapter_cfg {
            self.project_adapter_cfg.merge_from(&cfg);
        }
        if let Some(adapters) = patch.adapter {
            for (name, adapter) in adapters {
                self.adapter.insert(name, adapter);
            }
        }
        if let Some(retry) = patch.retry {
            self.retry.merge_from(&retry);
        }
        if patch.log_level.is_some() {
            self.log_level = patch.log_level;
        }
        if patch.reload.is_some() {
            self.reload = patch.reload;
        }
        if patch.on_success.is_some() {
            self.on_success = patch.on_success;
        }
        if patch.on_failure.is_some() {
            self.on_failure = patch.on_failure;
        }

        if let Some(v) = patch.max_retries {
            note_deprecated("max_retries");
            self.retry.max_retries.get_or_insert(v);
        }
        if let Some(v) = patch.retry_delay {
            note_deprecated("retry_delay");
            self.retry.retry_delay.get_or_insert(v);
        }
        if let Some(v) = patch.jitter_factor {
            note_deprecated("jitter_factor");
            self.retry.jitter_factor.get_or_insert(v);
        }
        if let Some(v) = patch.retry_exceptions {
            note_deprecated("retry_exceptions");
            self.retry.retry_exceptions.get_or_insert(v);
        }
    }

    /// Validates the merged configuration before a run.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.executor.validate()?;
        self.retry.validate()
    }
}

fn merge_json_map(target: &mut Option<JsonMap>, higher: Option<&JsonMap>) {
    let Some(higher) = higher else { return };
    match target {
        Some(existing) => {
            let mut merged = serde_json::Value::Object(std::mem::take(existing));
            deep_merge(&mut merged, serde_json::Value::Object(higher.clone()));
            if let serde_json::Value::Object(map) = merged {
                *existing = map;
            }
        }
        None => *target = Some(higher.clone()),
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("inputs", &self.inputs)
            .field("final_vars", &self.final_vars)
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("executor", &self.executor)
            .field("with_adapter", &self.with_adapter)
            .field("pipeline_adapter_cfg", &self.pipeline_adapter_cfg)
            .field("project_adapter_cfg", &self.project_adapter_cfg)
            .field(
                "adapter",
                &self.adapter.keys().collect::<Vec<_>>(),
            )
            .field("retry", &self.retry)
            .field("log_level", &self.log_level)
            .field("reload", &self.reload)
            .field("on_success", &self.on_success.as_ref().map(|_| "<callback>"))
            .field("on_failure", &self.on_failure.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl PartialEq for RunConfig {
    fn eq(&self, other: &Self) -> bool {
        // Callbacks and adapter instances compare by identity; vtable
        // addresses are unstable, so only the data pointers are compared.
        fn arc_data_eq<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
            std::ptr::eq(Arc::as_ptr(a).cast::<u8>(), Arc::as_ptr(b).cast::<u8>())
        }

        fn arc_eq<T: ?Sized>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => arc_data_eq(a, b),
                _ => false,
            }
        }

        self.inputs == other.inputs
            && self.final_vars == other.final_vars
            && self.config == other.config
            && self.cache == other.cache
            && self.executor == other.executor
            && self.with_adapter == other.with_adapter
            && self.pipeline_adapter_cfg == other.pipeline_adapter_cfg
            && self.project_adapter_cfg == other.project_adapter_cfg
            && self.retry == other.retry
            && self.log_level == other.log_level
            && self.reload == other.reload
            && self.adapter.len() == other.adapter.len()
            && self
                .adapter
                .iter()
                .zip(other.adapter.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && arc_data_eq(va, vb))
            && arc_eq(self.on_success.as_ref(), other.on_success.as_ref())
            && arc_eq(self.on_failure.as_ref(), other.on_failure.as_ref())
    }
}

// ---------------------------------------------------------------------------
// RunOverrides
// ---------------------------------------------------------------------------

/// Call-site keyword overrides for one run, the highest precedence layer.
///
/// Every field is optional; unset fields leave the merged configuration
/// untouched. The legacy retry fields are accepted here too, with the same
/// deprecation semantics as on `RunConfig`.
#[derive(Clone, Default)]
pub struct RunOverrides {
    pub inputs: Option<JsonMap>,
    pub final_vars: Option<Vec<String>>,
    pub config: Option<JsonMap>,
    pub cache: Option<CachePolicy>,
    pub executor: Option<ExecutorConfig>,
    pub with_adapter: Option<WithAdapterSet>,
    pub pipeline_adapter_cfg: Option<AdapterConfigSet>,
    pub project_adapter_cfg: Option<AdapterConfigSet>,
    pub adapter: Option<IndexMap<String, Arc<dyn Adapter>>>,
    pub retry: Option<RetryPolicy>,
    pub log_level: Option<LogLevel>,
    pub reload: Option<bool>,
    pub on_success: Option<OnSuccess>,
    pub on_failure: Option<OnFailure>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<f64>,
    pub jitter_factor: Option<f64>,
    pub retry_exceptions: Option<Vec<FailureClass>>,
}

impl std::fmt::Debug for RunOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOverrides")
            .field("inputs", &self.inputs)
            .field("final_vars", &self.final_vars)
            .field("executor", &self.executor)
            .field("retry", &self.retry)
            .field("log_level", &self.log_level)
            .field("reload", &self.reload)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Chainable construction of an immutable [`RunConfig`].
#[derive(Default)]
pub struct RunConfigBuilder {
    cfg: RunConfig,
}

impl RunConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_inputs(mut self, inputs: JsonMap) -> Self {
        self.cfg.inputs = Some(inputs);
        self
    }

    /// Adds one input override, creating the mapping on first use.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.cfg
            .inputs
            .get_or_insert_with(JsonMap::new)
            .insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_final_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cfg.final_vars = Some(vars.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: JsonMap) -> Self {
        self.cfg.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cfg.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: impl Into<ExecutorConfig>) -> Self {
        self.cfg.executor = executor.into();
        self
    }

    #[must_use]
    pub fn with_adapter_flag(mut self, key: impl Into<String>, enabled: bool) -> Self {
        self.cfg.with_adapter.set(key, enabled);
        self
    }

    #[must_use]
    pub fn with_pipeline_adapter_cfg(mut self, cfg: AdapterConfigSet) -> Self {
        self.cfg.pipeline_adapter_cfg = cfg;
        self
    }

    #[must_use]
    pub fn with_project_adapter_cfg(mut self, cfg: AdapterConfigSet) -> Self {
        self.cfg.project_adapter_cfg = cfg;
        self
    }

    #[must_use]
    pub fn with_custom_adapter(mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.cfg.adapter.insert(name.into(), adapter);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.cfg.retry = retry;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.cfg.log_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_reload(mut self, reload: bool) -> Self {
        self.cfg.reload = Some(reload);
        self
    }

    #[must_use]
    pub fn with_on_success(mut self, callback: OnSuccess) -> Self {
        self.cfg.on_success = Some(callback);
        self
    }

    #[must_use]
    pub fn with_on_failure(mut self, callback: OnFailure) -> Self {
        self.cfg.on_failure = Some(callback);
        self
    }

    #[deprecated(note = "set retry.max_retries via with_retry instead")]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.cfg.legacy_max_retries = Some(max_retries);
        self
    }

    #[deprecated(note = "set retry.retry_delay via with_retry instead")]
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: f64) -> Self {
        self.cfg.legacy_retry_delay = Some(retry_delay);
        self
    }

    #[deprecated(note = "set retry.jitter_factor via with_retry instead")]
    #[must_use]
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.cfg.legacy_jitter_factor = Some(jitter_factor);
        self
    }

    #[deprecated(note = "set retry.retry_exceptions via with_retry instead")]
    #[must_use]
    pub fn with_retry_exceptions(mut self, classes: Vec<FailureClass>) -> Self {
        self.cfg.legacy_retry_exceptions = Some(classes);
        self
    }

    /// Finalizes the configuration: folds legacy fields and validates.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for out-of-range executor or retry values.
    pub fn build(mut self) -> Result<RunConfig, Error> {
        self.cfg.normalize_legacy();
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

// ---------------------------------------------------------------------------
// File-backed records
// ---------------------------------------------------------------------------

/// One pipeline's file-backed configuration (`conf/pipelines/<name>.yml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub run: RunConfig,
    /// Scheduling metadata, carried for tooling; the runtime ignores it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub params: JsonMap,
    #[serde(default, skip_serializing_if = "AdapterConfigSet::is_empty")]
    pub adapter: AdapterConfigSet,
}

/// Project-wide configuration (`conf/project.yml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "AdapterConfigSet::is_empty")]
    pub adapter: AdapterConfigSet,
}
