//! Periodic snapshot scheduling.
//!
//! The scheduler fires immediately on activation and then every
//! `backup_frequency`. It is driven cooperatively by the client event loop
//! rather than owning a task of its own, so the shutdown signal
//! short-circuits the current delay. In offline mode the timer never
//! starts: backing up a replica that is not live-synced is meaningless.
//!
//! A failed iteration (replica closed, copy error) is logged and the loop
//! carries on; a single bad snapshot must never terminate the scheduler.

use crate::config::ClientConfig;
use crate::retention::{RetentionPruner, SnapshotKey, SNAPSHOT_EXTENSION};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use storesync_backend::{ReplicaHandle, SyncBackend};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Schedules snapshot copies and retention pruning.
pub struct SnapshotScheduler<B: SyncBackend> {
    backend: Arc<B>,
    version: String,
    snapshot_dir: PathBuf,
    pruner: RetentionPruner,
    timer: Option<Interval>,
    seq: u32,
}

impl<B: SyncBackend> SnapshotScheduler<B> {
    /// Creates a scheduler from the client configuration. Inactive in
    /// offline mode.
    pub fn new(backend: Arc<B>, config: &ClientConfig) -> Self {
        let timer = (!config.offline_mode).then(|| {
            let mut timer = interval(config.backup_frequency);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        Self {
            backend,
            version: config.app_version.clone(),
            snapshot_dir: config.snapshot_dir.clone(),
            pruner: RetentionPruner::new(&config.snapshot_dir, config.max_retained_snapshots),
            timer,
            seq: 0,
        }
    }

    /// True when the periodic timer is running.
    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    /// Resolves at the next scheduled iteration; pends forever when
    /// inactive. The first call resolves immediately.
    pub async fn tick(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Destination path for the next snapshot, embedding the application
    /// version and a monotonic ordering key.
    fn next_destination(&mut self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.seq = self.seq.wrapping_add(1);
        let key = SnapshotKey {
            millis,
            seq: self.seq,
        };
        self.snapshot_dir.join(format!(
            "store-v{}-{}.{}",
            self.version,
            key.encode(),
            SNAPSHOT_EXTENSION
        ))
    }

    /// Runs one scheduler iteration: snapshot the open replica, then
    /// prune. Returns the snapshot path when the copy succeeded.
    pub async fn run_once(&mut self, handle: Option<&ReplicaHandle>) -> Option<PathBuf> {
        let destination = self.next_destination();
        let copied = match handle {
            Some(handle) => {
                info!(path = %destination.display(), "backing up replica");
                if let Err(e) = fs::create_dir_all(&self.snapshot_dir) {
                    warn!(dir = %self.snapshot_dir.display(), error = %e, "could not create snapshot directory");
                }
                match self.backend.copy_snapshot(handle, &destination).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "snapshot copy failed; next interval will retry");
                        false
                    }
                }
            }
            None => {
                warn!("replica is not open; skipping this snapshot iteration");
                false
            }
        };

        let outcome = self.pruner.prune();
        debug!(
            retained = outcome.retained,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "retention pass complete"
        );

        copied.then_some(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_backend::{
        AccessToken, ClientResetMode, Credentials, LoopbackBackend, OpenMode, OpenRequest,
        StoreId,
    };

    fn config(dir: &std::path::Path) -> ClientConfig {
        ClientConfig::new(StoreId::random(), dir).with_max_retained_snapshots(2)
    }

    async fn open_replica(
        backend: &LoopbackBackend,
        config: &ClientConfig,
    ) -> ReplicaHandle {
        let identity = backend
            .log_in(Credentials::jwt(AccessToken::new("token")))
            .await
            .unwrap();
        let (handle, _events) = backend
            .open(OpenRequest {
                path: config.replica_path.clone(),
                mode: OpenMode::Synced {
                    identity,
                    subscriptions: Vec::new(),
                    reset_mode: ClientResetMode::DiscardUnsyncedChanges,
                },
            })
            .await
            .unwrap();
        handle
    }

    #[tokio::test]
    async fn offline_mode_never_starts_the_timer() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path()).with_offline_restore(dir.path().join("old.snap"));
        let scheduler = SnapshotScheduler::new(Arc::new(LoopbackBackend::new()), &config);
        assert!(!scheduler.is_active());
    }

    #[tokio::test]
    async fn iteration_snapshots_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let backend = Arc::new(LoopbackBackend::new());
        let handle = open_replica(&backend, &config).await;

        let mut scheduler = SnapshotScheduler::new(Arc::clone(&backend), &config);
        assert!(scheduler.is_active());

        for _ in 0..4 {
            assert!(scheduler.run_once(Some(&handle)).await.is_some());
        }

        // Retention ceiling is 2: older snapshots and their sidecars are
        // gone.
        let pruner = RetentionPruner::new(&config.snapshot_dir, 2);
        let remaining = pruner.list_snapshots();
        assert_eq!(remaining.len(), 2);
        for snapshot in &remaining {
            assert!(snapshot.path.is_file());
            assert!(snapshot.sidecar_path().is_dir());
        }
        assert_eq!(backend.snapshot_count(), 4);
    }

    #[tokio::test]
    async fn closed_replica_fails_the_iteration_without_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let backend = Arc::new(LoopbackBackend::new());

        let mut scheduler = SnapshotScheduler::new(Arc::clone(&backend), &config);
        assert!(scheduler.run_once(None).await.is_none());

        // A later iteration with an open replica succeeds.
        let handle = open_replica(&backend, &config).await;
        assert!(scheduler.run_once(Some(&handle)).await.is_some());
    }

    #[tokio::test]
    async fn destinations_embed_version_and_order_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path()).with_app_version("2.0.0-alpha.3");
        let backend = Arc::new(LoopbackBackend::new());
        let mut scheduler = SnapshotScheduler::new(backend, &config);

        let a = scheduler.next_destination();
        let b = scheduler.next_destination();
        let stem_a = a.file_stem().unwrap().to_str().unwrap().to_owned();
        let stem_b = b.file_stem().unwrap().to_str().unwrap().to_owned();

        assert!(stem_a.starts_with("store-v2.0.0-alpha.3-"));
        assert!(SnapshotKey::parse(&stem_a).unwrap() < SnapshotKey::parse(&stem_b).unwrap());
    }
}
