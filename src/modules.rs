//! Pipeline module loading and the process-wide module cache.
//!
//! A "module" is the user's pipeline definition file, read from the project
//! pipelines directory and handed to the engine as source text. Loaded
//! modules are cached per path; the invalidation key is the file's content
//! hash plus its mtime, and `reload` bypasses the cache entirely.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::Error;
use crate::fs::FileSystem;

/// Compute SHA-256 hash of content and return as hex string.
#[must_use]
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Invalidation key for a cached module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFingerprint {
    pub sha256: String,
    pub mtime_secs: Option<u64>,
}

/// A loaded pipeline module, shared between the cache and in-flight runs.
#[derive(Debug, Clone)]
pub struct PipelineModule {
    pub name: String,
    pub path: PathBuf,
    pub source: String,
    pub fingerprint: ModuleFingerprint,
}

/// Process-wide module cache. Reads take the shared guard; imports and
/// invalidations take the exclusive guard.
#[derive(Default)]
pub struct ModuleCache {
    inner: RwLock<HashMap<PathBuf, Arc<PipelineModule>>>,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every executor in the process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ModuleCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Resolves a pipeline module, reusing the cached copy when the
    /// fingerprint still matches.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineImport` error when the module file cannot be read.
    pub fn load<F: FileSystem>(
        &self,
        fs: &F,
        modules_dir: &Path,
        name: &str,
        extension: &str,
        reload: bool,
    ) -> Result<Arc<PipelineModule>, Error> {
        let path = modules_dir.join(format!("{name}.{extension}"));
        let mtime = fs.mtime_secs(&path);

        if !reload {
            let cached = self
                .inner
                .read()
                .map(|map| map.get(&path).cloned())
                .unwrap_or_default();
            if let Some(module) = cached {
                if mtime.is_some() && module.fingerprint.mtime_secs == mtime {
                    tracing::trace!(pipeline = name, "module cache hit");
                    return Ok(module);
                }
            }
        }

        let source = fs
            .read_to_string(&path)
            .map_err(|e| Error::pipeline_import_io(name, e))?;
        let fingerprint = ModuleFingerprint {
            sha256: compute_content_hash(source.as_bytes()),
            mtime_secs: mtime,
        };

        let mut map = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !reload {
            if let Some(existing) = map.get(&path) {
                if existing.fingerprint.sha256 == fingerprint.sha256 {
                    // Content unchanged; refresh the recorded mtime so the
                    // fast path applies again.
                    let refreshed = Arc::new(PipelineModule {
                        fingerprint,
                        ..(**existing).clone()
                    });
                    map.insert(path, Arc::clone(&refreshed));
                    tracing::trace!(pipeline = name, "module cache hit (content match)");
                    return Ok(refreshed);
                }
            }
        }

        let module = Arc::new(PipelineModule {
            name: name.to_string(),
            path: path.clone(),
            source,
            fingerprint,
        });
        map.insert(path, Arc::clone(&module));
        tracing::debug!(pipeline = name, reload, "pipeline module imported");
        Ok(module)
    }

    /// Drops the cached entry for one module path.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(path);
        }
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeFs {
        files: Mutex<HashMap<PathBuf, (String, u64)>>,
        reads: Mutex<u32>,
    }

    impl FakeFs {
        fn put(&self, path: &str, content: &str, mtime: u64) {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), (content.to_string(), mtime));
        }

        fn reads(&self) -> u32 {
            *self.reads.lock().unwrap()
        }
    }

    impl FileSystem for FakeFs {
        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            *self.reads.lock().unwrap() += 1;
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(content, _)| content.clone())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not found"))
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }

        fn is_file(&self, path: &Path) -> bool {
            self.exists(path)
        }

        fn mtime_secs(&self, path: &Path) -> Option<u64> {
            self.files.lock().unwrap().get(path).map(|(_, m)| *m)
        }
    }

    #[test]
    fn second_load_is_served_from_cache() {
        let fs = FakeFs::default();
        fs.put("pipes/p1.py", "def y(x): ...", 100);
        let cache = ModuleCache::new();
        let first = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        let second = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fs.reads(), 1);
    }

    #[test]
    fn changed_content_invalidates_the_entry() {
        let fs = FakeFs::default();
        fs.put("pipes/p1.py", "v1", 100);
        let cache = ModuleCache::new();
        let first = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        fs.put("pipes/p1.py", "v2", 200);
        let second = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        assert_ne!(first.fingerprint.sha256, second.fingerprint.sha256);
        assert_eq!(second.source, "v2");
    }

    #[test]
    fn touched_but_identical_file_reuses_the_source() {
        let fs = FakeFs::default();
        fs.put("pipes/p1.py", "same", 100);
        let cache = ModuleCache::new();
        let first = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        fs.put("pipes/p1.py", "same", 200);
        let second = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        assert_eq!(first.fingerprint.sha256, second.fingerprint.sha256);
        assert_eq!(second.fingerprint.mtime_secs, Some(200));
        // And the refreshed fingerprint restores the fast path.
        let third = cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn reload_bypasses_the_cache() {
        let fs = FakeFs::default();
        fs.put("pipes/p1.py", "v1", 100);
        let cache = ModuleCache::new();
        cache.load(&fs, Path::new("pipes"), "p1", "py", false).unwrap();
        cache.load(&fs, Path::new("pipes"), "p1", "py", true).unwrap();
        assert_eq!(fs.reads(), 2);
    }

    #[test]
    fn missing_module_is_an_import_error() {
        let fs = FakeFs::default();
        let cache = ModuleCache::new();
        let err = cache
            .load(&fs, Path::new("pipes"), "ghost", "py", false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PipelineImport);
        assert!(err.to_string().contains("ghost"));
    }
}
