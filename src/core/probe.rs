use crate::core::store::Locator;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub path: PathBuf,
    /// The path resolves but the resource there is not the one the locator
    /// was captured for (it was replaced or relocated).
    pub is_stale: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("cannot resolve locator for {path}: {source}")]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystem queries behind the state derivation, injected so staleness and
/// missing files can be simulated in tests without real I/O.
pub trait FsProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Captures a locator for a freshly placed download. The captured path
    /// must be absolute: locators outlive the process and a relative path
    /// would silently re-anchor to whatever the working directory is at
    /// resolution time.
    fn locator_for(&self, path: &Path) -> Result<Locator, LocatorError>;

    fn resolve(&self, locator: &Locator) -> Result<ResolvedLocation, LocatorError>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

pub struct RealFs;

impl RealFs {
    fn fingerprint(meta: &fs::Metadata) -> u64 {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            meta.ino()
        }
        #[cfg(not(unix))]
        {
            use std::time::UNIX_EPOCH;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            meta.len() ^ mtime.rotate_left(32)
        }
    }

    fn unresolvable(path: &Path, source: io::Error) -> LocatorError {
        LocatorError::Unresolvable {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl FsProbe for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn locator_for(&self, path: &Path) -> Result<Locator, LocatorError> {
        let path = fs::canonicalize(path).map_err(|e| Self::unresolvable(path, e))?;
        let meta = fs::metadata(&path).map_err(|e| Self::unresolvable(&path, e))?;
        Ok(Locator {
            path,
            fingerprint: Self::fingerprint(&meta),
        })
    }

    fn resolve(&self, locator: &Locator) -> Result<ResolvedLocation, LocatorError> {
        let meta = fs::metadata(&locator.path).map_err(|e| Self::unresolvable(&locator.path, e))?;
        Ok(ResolvedLocation {
            path: locator.path.clone(),
            is_stale: Self::fingerprint(&meta) != locator.fingerprint,
        })
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}
