//! Config file loading and precedence resolution.
//!
//! The effective run configuration is assembled from six layers, highest
//! precedence first: call-site overrides, the call-site `RunConfig`,
//! `FP_PIPELINE__*` / `FP_PROJECT__*` environment overlays, the YAML file
//! (after interpolation), global `FP_*` shims (only where the specific key
//! is still unset), and hard-coded defaults. Mappings deep-merge key-wise;
//! sequences and scalars replace.

use std::path::Path;

use crate::config::interpolation::interpolate_document;
use crate::config::model::{
    ExecutorKind, LogLevel, PipelineConfig, ProjectConfig, RunConfig, RunOverrides,
};
use crate::config::EnvSnapshot;
use crate::constants;
use crate::error::{ConfigLayer, Error};
use crate::fs::FileSystem;

/// Deep-merges `overlay` into `base`: objects merge key-wise, everything
/// else replaces.
pub(crate) fn deep_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Strictly coerces an environment value: booleans, integers, floats, and
/// JSON literals parse to their typed form; everything else stays a string.
pub(crate) fn coerce_env_scalar(raw: &str) -> serde_json::Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return serde_json::Value::Bool(true),
        "false" => return serde_json::Value::Bool(false),
        "null" => return serde_json::Value::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return serde_json::Value::Number(n);
            }
        }
    }
    let trimmed = raw.trim_start();
    if trimmed.starts_with(['[', '{']) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            return value;
        }
    }
    serde_json::Value::String(raw.to_string())
}

/// Applies `PREFIX__PATH=value` overlays onto a config value tree. Path
/// segments are matched case-insensitively against existing keys; missing
/// intermediate mappings are created. Returns whether anything was applied.
fn overlay_env(target: &mut serde_json::Value, env: &EnvSnapshot, prefix: &str) -> bool {
    let mut entries: Vec<(Vec<String>, serde_json::Value)> = env
        .with_prefix(prefix)
        .filter_map(|(path, raw)| {
            let segments: Vec<String> = path
                .split("__")
                .map(str::to_ascii_lowercase)
                .collect();
            if segments.iter().any(String::is_empty) {
                tracing::warn!(variable = %format!("{prefix}{path}"), "ignoring malformed overlay path");
                return None;
            }
            Some((segments, coerce_env_scalar(raw)))
        })
        .collect();
    // Apply in a stable order so overlapping paths resolve deterministically.
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let applied = !entries.is_empty();
    for (segments, value) in entries {
        set_path(target, &segments, value);
    }
    applied
}

fn set_path(target: &mut serde_json::Value, segments: &[String], value: serde_json::Value) {
    let [head, rest @ ..] = segments else { return };

    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    let map = target.as_object_mut().expect("coerced to object above");

    let key = map
        .keys()
        .find(|k| k.eq_ignore_ascii_case(head))
        .cloned()
        .unwrap_or_else(|| head.clone());

    if rest.is_empty() {
        map.insert(key, value);
    } else {
        let slot = map
            .entry(key)
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        set_path(slot, rest, value);
    }
}

fn read_document<F: FileSystem>(
    fs: &F,
    path: &Path,
    env: &EnvSnapshot,
) -> Result<Option<serde_json::Value>, Error> {
    if !fs.is_file(path) {
        return Ok(None);
    }
    let text = fs.read_to_string(path)?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| {
        Error::config_in(
            ConfigLayer::File,
            format!("failed to parse {}: {e}", path.display()),
        )
    })?;
    interpolate_document(doc, env).map(Some)
}

fn deserialize_layer<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    layer: ConfigLayer,
    path: &Path,
) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| {
        Error::config_in(layer, format!("invalid value in {}: {e}", path.display()))
    })
}

/// Loads one pipeline's config file and applies `FP_PIPELINE__*` overlays.
/// A missing file yields the default (empty) configuration.
///
/// # Errors
///
/// Returns a `Config` error, attributed to the file or overlay layer, when
/// parsing, interpolation, or typing fails.
pub fn load_pipeline_config<F: FileSystem>(
    fs: &F,
    path: &Path,
    env: &EnvSnapshot,
) -> Result<PipelineConfig, Error> {
    let Some(mut value) = read_document(fs, path, env)? else {
        let mut value = serde_json::Value::Object(serde_json::Map::new());
        if overlay_env(&mut value, env, constants::ENV_PIPELINE_PREFIX) {
            let mut cfg: PipelineConfig =
                deserialize_layer(value, ConfigLayer::EnvOverlay, path)?;
            cfg.run.normalize_legacy();
            return Ok(cfg);
        }
        return Ok(PipelineConfig::default());
    };

    // Type-check the file layer on its own first, so a bad file value is
    // attributed to the file even when overlays are also present.
    let _: PipelineConfig = deserialize_layer(value.clone(), ConfigLayer::File, path)?;
    overlay_env(&mut value, env, constants::ENV_PIPELINE_PREFIX);
    let mut cfg: PipelineConfig = deserialize_layer(value, ConfigLayer::EnvOverlay, path)?;
    cfg.run.normalize_legacy();
    Ok(cfg)
}

/// Loads the project config file and applies `FP_PROJECT__*` overlays.
/// A missing file yields the default (empty) configuration.
///
/// # Errors
///
/// Returns a `Config` error, attributed to the file or overlay layer, when
/// parsing, interpolation, or typing fails.
pub fn load_project_config<F: FileSystem>(
    fs: &F,
    path: &Path,
    env: &EnvSnapshot,
) -> Result<ProjectConfig, Error> {
    let Some(mut value) = read_document(fs, path, env)? else {
        let mut value = serde_json::Value::Object(serde_json::Map::new());
        if overlay_env(&mut value, env, constants::ENV_PROJECT_PREFIX) {
            return deserialize_layer(value, ConfigLayer::EnvOverlay, path);
        }
        return Ok(ProjectConfig::default());
    };

    let _: ProjectConfig = deserialize_layer(value.clone(), ConfigLayer::File, path)?;
    overlay_env(&mut value, env, constants::ENV_PROJECT_PREFIX);
    deserialize_layer(value, ConfigLayer::EnvOverlay, path)
}

/// Folds the file-backed sections into a single run config: the pipeline
/// file's `adapter` section becomes the pipeline-scoped adapter config, the
/// project's becomes the project-scoped one, and `params` become engine
/// config defaults underneath `run.config`.
pub(crate) fn fold_file_config(pipeline: PipelineConfig, project: &ProjectConfig) -> RunConfig {
    let mut run = pipeline.run;

    let mut pipeline_set = pipeline.adapter;
    pipeline_set.merge_from(&run.pipeline_adapter_cfg);
    run.pipeline_adapter_cfg = pipeline_set;

    let mut project_set = project.adapter.clone();
    project_set.merge_from(&run.project_adapter_cfg);
    run.project_adapter_cfg = project_set;

    if !pipeline.params.is_empty() {
        let mut config = serde_json::Value::Object(pipeline.params);
        if let Some(existing) = run.config.take() {
            deep_merge(&mut config, serde_json::Value::Object(existing));
        }
        if let serde_json::Value::Object(map) = config {
            run.config = Some(map);
        }
    }
    run
}

fn shim_parse<T, E>(
    raw: &str,
    variable: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
    expected: &str,
) -> Result<T, Error> {
    parse(raw).map_err(|_| {
        Error::config_in(
            ConfigLayer::EnvShim,
            format!("{variable}: cannot coerce '{raw}' to {expected}"),
        )
    })
}

/// Applies the global `FP_*` shims into fields the higher layers left
/// unset.
///
/// # Errors
///
/// Returns a `Config` error attributed to the shim layer when a value fails
/// strict coercion.
pub(crate) fn apply_global_shims(run: &mut RunConfig, env: &EnvSnapshot) -> Result<(), Error> {
    if run.log_level.is_none() {
        if let Some(raw) = env.get(constants::ENV_LOG_LEVEL) {
            run.log_level = Some(shim_parse(
                raw,
                constants::ENV_LOG_LEVEL,
                LogLevel::parse,
                "a log level",
            )?);
        }
    }
    if run.executor.kind.is_none() {
        if let Some(raw) = env.get(constants::ENV_EXECUTOR) {
            run.executor.kind = Some(shim_parse(
                raw,
                constants::ENV_EXECUTOR,
                ExecutorKind::parse,
                "an executor type",
            )?);
        }
    }
    if run.executor.max_workers.is_none() {
        if let Some(raw) = env.get(constants::ENV_EXECUTOR_MAX_WORKERS) {
            run.executor.max_workers = Some(shim_parse(
                raw,
                constants::ENV_EXECUTOR_MAX_WORKERS,
                str::parse::<usize>,
                "an integer",
            )?);
        }
    }
    if run.executor.num_cpus.is_none() {
        if let Some(raw) = env.get(constants::ENV_EXECUTOR_NUM_CPUS) {
            run.executor.num_cpus = Some(shim_parse(
                raw,
                constants::ENV_EXECUTOR_NUM_CPUS,
                str::parse::<usize>,
                "an integer",
            )?);
        }
    }
    if run.retry.max_retries.is_none() {
        if let Some(raw) = env.get(constants::ENV_MAX_RETRIES) {
            run.retry.max_retries = Some(shim_parse(
                raw,
                constants::ENV_MAX_RETRIES,
                str::parse::<u32>,
                "an integer",
            )?);
        }
    }
    if run.retry.retry_delay.is_none() {
        if let Some(raw) = env.get(constants::ENV_RETRY_DELAY) {
            run.retry.retry_delay = Some(shim_parse(
                raw,
                constants::ENV_RETRY_DELAY,
                str::parse::<f64>,
                "a number",
            )?);
        }
    }
    if run.retry.jitter_factor.is_none() {
        if let Some(raw) = env.get(constants::ENV_JITTER_FACTOR) {
            run.retry.jitter_factor = Some(shim_parse(
                raw,
                constants::ENV_JITTER_FACTOR,
                str::parse::<f64>,
                "a number",
            )?);
        }
    }
    Ok(())
}

/// Resolves the effective run configuration for one run.
///
/// `file_run` must already carry the file and env-overlay layers; this
/// merges the call-site `RunConfig`, then the overrides, then fills gaps
/// from the global shims, and validates the result.
///
/// # Errors
///
/// Returns a `Config` error on shim coercion failure or when the merged
/// configuration fails validation.
pub(crate) fn resolve_run_config(
    file_run: RunConfig,
    run_config: Option<&RunConfig>,
    overrides: RunOverrides,
    env: &EnvSnapshot,
) -> Result<RunConfig, Error> {
    let mut effective = file_run;
    if let Some(call_cfg) = run_config {
        effective.merge_from(call_cfg);
    }
    effective.apply_overrides(overrides);
    apply_global_shims(&mut effective, env)?;
    effective.normalize_legacy();
    effective.validate()?;
    Ok(effective)
}
