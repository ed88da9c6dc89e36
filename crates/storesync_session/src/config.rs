//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;
use storesync_backend::StoreId;

/// Default interval between snapshot iterations, in hours.
pub const DEFAULT_BACKUP_FREQUENCY_HOURS: u64 = 1;
/// Default retention ceiling enforced by the pruner.
pub const DEFAULT_MAX_RETAINED_SNAPSHOTS: usize = 5;
/// Consecutive reconnect failures before the monitor raises an operator
/// alert.
pub const DEFAULT_FAILED_RECONNECT_ALERT_THRESHOLD: u32 = 3;

/// Configuration for the sync client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identifies the store whose records sync to this client.
    pub store_scope_id: StoreId,
    /// Root directory for the replica and its backups.
    pub data_dir: PathBuf,
    /// Path of the live replica file.
    pub replica_path: PathBuf,
    /// Directory holding snapshot files and their sidecars.
    pub snapshot_dir: PathBuf,
    /// Snapshot to open directly when running offline.
    pub restore_source: Option<PathBuf>,
    /// Open the replica restored from a snapshot instead of live-synced.
    pub offline_mode: bool,
    /// Interval between snapshot iterations.
    pub backup_frequency: Duration,
    /// Maximum number of snapshots kept after a pruning pass.
    pub max_retained_snapshots: usize,
    /// Application version embedded in replica and snapshot file names.
    pub app_version: String,
    /// Read-mostly clients discard unsynced changes on a client reset;
    /// read-write clients attempt recovery first.
    pub read_only: bool,
    /// Consecutive reconnect failures before an operator alert.
    pub failed_reconnect_alert_threshold: u32,
}

impl ClientConfig {
    /// Creates a configuration rooted at `data_dir`, deriving the replica
    /// path and snapshot directory from it.
    pub fn new(store_scope_id: StoreId, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let app_version = env!("CARGO_PKG_VERSION").to_string();
        Self {
            store_scope_id,
            replica_path: data_dir.join(format!("store-v{app_version}.db")),
            snapshot_dir: data_dir.join("backups"),
            data_dir,
            restore_source: None,
            offline_mode: false,
            backup_frequency: Duration::from_secs(DEFAULT_BACKUP_FREQUENCY_HOURS * 3600),
            max_retained_snapshots: DEFAULT_MAX_RETAINED_SNAPSHOTS,
            app_version,
            read_only: false,
            failed_reconnect_alert_threshold: DEFAULT_FAILED_RECONNECT_ALERT_THRESHOLD,
        }
    }

    /// Switches to offline mode, opening the given snapshot directly.
    pub fn with_offline_restore(mut self, source: impl Into<PathBuf>) -> Self {
        self.offline_mode = true;
        self.restore_source = Some(source.into());
        self
    }

    /// Sets the snapshot interval in hours.
    pub fn with_backup_frequency_hours(mut self, hours: u64) -> Self {
        self.backup_frequency = Duration::from_secs(hours * 3600);
        self
    }

    /// Sets the snapshot interval directly; useful in tests.
    pub fn with_backup_frequency(mut self, frequency: Duration) -> Self {
        self.backup_frequency = frequency;
        self
    }

    /// Sets the retention ceiling.
    pub fn with_max_retained_snapshots(mut self, max: usize) -> Self {
        self.max_retained_snapshots = max;
        self
    }

    /// Overrides the live replica path.
    pub fn with_replica_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.replica_path = path.into();
        self
    }

    /// Overrides the snapshot directory.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Marks the client read-mostly, selecting the discarding reset policy.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Overrides the embedded application version.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Sets the reconnect-failure alert threshold.
    pub fn with_failed_reconnect_alert_threshold(mut self, threshold: u32) -> Self {
        self.failed_reconnect_alert_threshold = threshold;
        self
    }
}
