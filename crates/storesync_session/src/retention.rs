//! Snapshot retention.
//!
//! Snapshot files are named
//! `store-v{version}-{millis:013}-{seq:04}.snap`: the zero-padded unix
//! milliseconds plus a per-process sequence form the ordering key, so
//! lexicographic, numeric, and creation order agree across restarts. The
//! pruner keeps the newest `max_kept` snapshots and deletes the rest,
//! oldest first, together with their backend-managed sidecar directories.
//! Everything here is best-effort: failures are logged, never raised.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use storesync_backend::SNAPSHOT_SIDECAR_EXTENSION;
use tracing::{debug, info, warn};

/// Extension of snapshot files; filtering on it skips lock files and other
/// neighbors in the backup directory.
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// Ordering key embedded in a snapshot file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey {
    /// Unix timestamp in milliseconds at snapshot time.
    pub millis: u64,
    /// Per-process sequence number breaking same-millisecond ties.
    pub seq: u32,
}

impl SnapshotKey {
    /// Parses the key from a snapshot file stem.
    ///
    /// The key occupies the last two `-`-separated segments, so version
    /// strings containing hyphens parse fine.
    pub fn parse(stem: &str) -> Option<Self> {
        let mut parts = stem.rsplitn(3, '-');
        let seq = parts.next()?.parse().ok()?;
        let millis = parts.next()?.parse().ok()?;
        parts.next()?;
        Some(Self { millis, seq })
    }

    /// Encodes the key as it appears in file names. Zero-padded so string
    /// order equals numeric order.
    pub fn encode(&self) -> String {
        format!("{:013}-{:04}", self.millis, self.seq)
    }
}

/// A snapshot file found in the backup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    /// Path of the snapshot file.
    pub path: PathBuf,
    /// Ordering key parsed from the file name.
    pub key: SnapshotKey,
}

impl BackupSnapshot {
    /// The sidecar metadata directory sharing this snapshot's base name.
    pub fn sidecar_path(&self) -> PathBuf {
        self.path.with_extension(SNAPSHOT_SIDECAR_EXTENSION)
    }
}

/// Result of one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Snapshots still present after the pass.
    pub retained: usize,
    /// Snapshots deleted by the pass.
    pub deleted: usize,
    /// Deletions that failed (logged, left for the next pass).
    pub failed: usize,
}

/// Enforces the snapshot retention ceiling.
#[derive(Debug)]
pub struct RetentionPruner {
    dir: PathBuf,
    max_kept: usize,
}

impl RetentionPruner {
    /// Creates a pruner over `dir` keeping at most `max_kept` snapshots.
    pub fn new(dir: impl Into<PathBuf>, max_kept: usize) -> Self {
        Self {
            dir: dir.into(),
            max_kept,
        }
    }

    /// Lists recognized snapshots, oldest first.
    ///
    /// Files whose names do not parse to a key are skipped with a warning:
    /// never delete what cannot be ordered.
    pub fn list_snapshots(&self) -> Vec<BackupSnapshot> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "snapshot directory not readable");
                return Vec::new();
            }
        };

        let mut snapshots: Vec<BackupSnapshot> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(OsStr::to_str) == Some(SNAPSHOT_EXTENSION)
            })
            .filter_map(|path| {
                let key = path
                    .file_stem()
                    .and_then(OsStr::to_str)
                    .and_then(SnapshotKey::parse);
                match key {
                    Some(key) => Some(BackupSnapshot { path, key }),
                    None => {
                        warn!(path = %path.display(), "snapshot file name does not parse; leaving it alone");
                        None
                    }
                }
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.key);
        snapshots
    }

    /// Deletes the oldest snapshots beyond the retention ceiling, sidecars
    /// included.
    pub fn prune(&self) -> PruneOutcome {
        let snapshots = self.list_snapshots();
        let mut outcome = PruneOutcome {
            retained: snapshots.len(),
            ..PruneOutcome::default()
        };
        if snapshots.len() <= self.max_kept {
            return outcome;
        }

        let excess = snapshots.len() - self.max_kept;
        for snapshot in &snapshots[..excess] {
            let sidecar = snapshot.sidecar_path();
            if sidecar.is_dir() {
                if let Err(e) = fs::remove_dir_all(&sidecar) {
                    warn!(path = %sidecar.display(), error = %e, "could not remove snapshot sidecar");
                }
            }
            match fs::remove_file(&snapshot.path) {
                Ok(()) => {
                    info!(path = %snapshot.path.display(), "pruned old snapshot");
                    outcome.deleted += 1;
                }
                Err(e) => {
                    warn!(path = %snapshot.path.display(), error = %e, "could not remove old snapshot");
                    outcome.failed += 1;
                }
            }
        }
        outcome.retained = snapshots.len() - outcome.deleted;
        outcome
    }

    /// The directory this pruner watches.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
