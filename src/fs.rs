//! Read-side filesystem abstraction.
//!
//! The runtime only ever reads project files (configs and pipeline modules),
//! so the trait is deliberately limited to the read interface. Tests provide
//! in-memory implementations.

use std::io;
use std::path::Path;

pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file into a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be read, or
    /// contains invalid UTF-8.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns `true` if the path points to an existing entity.
    fn exists(&self, path: &Path) -> bool;

    /// Returns `true` if the path exists and is pointing at a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Returns the file's modification time in seconds since the Unix epoch,
    /// or `None` if the metadata cannot be read.
    fn mtime_secs(&self, path: &Path) -> Option<u64>;
}

pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn mtime_secs(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }
}
