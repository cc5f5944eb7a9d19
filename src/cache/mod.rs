//! Content-addressed snapshot cache.
//!
//! Layout is flat: one `<program-id>.snapshot` per program. Entries are
//! append-only and a canonical path is either absent or fully written. New
//! content is staged in a temp file inside the cache directory and published
//! with a single rename, so readers never see a partial snapshot. No lock is
//! taken; concurrent commits of the same id race on the rename and both carry
//! the same bytes.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::snapshot::ProgramId;

/// Extension of every cache entry.
pub const SNAPSHOT_EXTENSION: &str = "snapshot";

const TEMP_PREFIX: &str = "jag_run_";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write snapshot cache file '{}'", path.display())]
    CacheWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to move snapshot into cache at '{}'", path.display())]
    CacheCommitFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read snapshot cache '{}'", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    /// Open (and create if needed) the cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::CacheWriteFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn canonical_path(&self, id: &ProgramId) -> PathBuf {
        self.dir.join(format!("{id}.{SNAPSHOT_EXTENSION}"))
    }

    /// Publish `source` as the snapshot for `id` and return its canonical path.
    pub fn commit(&self, source: &Path, id: &ProgramId) -> Result<PathBuf, CacheError> {
        self.commit_inner(source, id, |_| {})
    }

    /// `before_rename` sees the staged temp file after it is synced and
    /// before it becomes visible.
    fn commit_inner(
        &self,
        source: &Path,
        id: &ProgramId,
        before_rename: impl FnOnce(&Path),
    ) -> Result<PathBuf, CacheError> {
        let canonical = self.canonical_path(id);
        if same_file(source, &canonical) {
            return Ok(canonical);
        }

        if canonical.is_file() {
            if let (Ok(cached), Ok(incoming)) = (sha256_file(&canonical), sha256_file(source)) {
                if cached == incoming {
                    debug!("snapshot {id} already cached at {}", canonical.display());
                    return Ok(canonical);
                }
            }
        }

        let write_failed = |source| CacheError::CacheWriteFailed {
            path: canonical.clone(),
            source,
        };

        let mut input = File::open(source).map_err(|source_err| CacheError::ReadFailed {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        // Dropping the temp file on any early return removes it.
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&format!(".{SNAPSHOT_EXTENSION}"))
            .tempfile_in(&self.dir)
            .map_err(write_failed)?;
        io::copy(&mut input, tmp.as_file_mut()).map_err(write_failed)?;
        tmp.as_file_mut().flush().map_err(write_failed)?;
        tmp.as_file().sync_all().map_err(write_failed)?;

        before_rename(tmp.path());

        tmp.persist(&canonical)
            .map_err(|err| CacheError::CacheCommitFailed {
                path: canonical.clone(),
                source: err.error,
            })?;
        debug!("cached snapshot {id} at {}", canonical.display());
        Ok(canonical)
    }

    /// Cached snapshot for `id`, if any.
    pub fn get(&self, id: &ProgramId) -> Option<PathBuf> {
        let path = self.canonical_path(id);
        path.is_file().then_some(path)
    }

    /// All cached snapshots, ordered by program id. Staged temp files and
    /// unrelated files are skipped.
    pub fn list(&self) -> Result<Vec<(ProgramId, PathBuf)>, CacheError> {
        let read_failed = |source| CacheError::ReadFailed {
            path: self.dir.clone(),
            source,
        };

        let mut out = vec![];
        for ent in fs::read_dir(&self.dir).map_err(read_failed)? {
            let path = ent.map_err(read_failed)?.path();
            if path.extension().and_then(|s| s.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ProgramId>().ok())
            else {
                continue;
            };
            out.push((id, path));
        }
        out.sort();
        Ok(out)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut r = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
