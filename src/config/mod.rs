//! Layered run configuration: typed records, env interpolation, and the
//! precedence-resolving loader.

pub mod interpolation;
pub mod loader;
pub mod model;

pub use model::{
    AdapterConfigSet, CachePolicy, ExecutorConfig, ExecutorKind, LogLevel, OnFailure, OnSuccess,
    PipelineConfig, ProjectConfig, RetryPolicy, RunConfig, RunConfigBuilder, RunOverrides,
    WithAdapterSet,
};

use std::collections::HashMap;

/// An immutable view of the environment, captured once per load.
///
/// Interpolation and overlays read from a snapshot rather than the live
/// process environment, so a run observes one consistent set of values and
/// embedders (and tests) can supply their own.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Captures the current process environment.
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// An empty snapshot: every variable reads as unset.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Sets a variable on the snapshot, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Iterates variables whose name starts with `prefix`, yielding the
    /// remainder of the name and the value.
    pub(crate) fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.vars.iter().filter_map(move |(name, value)| {
            name.strip_prefix(prefix)
                .map(|rest| (rest, value.as_str()))
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
