//! The sync client: one lifecycle-managed context object owning the
//! session, the replica, and every observer, driven by a single-task event
//! loop.
//!
//! All backend callbacks (identity events, connection transitions, sync
//! errors, record changes, reset hooks) and the snapshot timer are branches
//! of one `select!` loop, so no two callbacks ever execute in parallel;
//! they interleave only at await points. That is what makes the re-open
//! in-flight guard in the lifecycle sufficient.

use crate::config::ClientConfig;
use crate::connection::ConnectionMonitor;
use crate::error::SessionResult;
use crate::replica::{ReplicaLifecycle, ReplicaListeners, ReopenedSession};
use crate::reset::{select_reset_mode, ClientResetCoordinator};
use crate::session::{IdentityOutcome, SessionManager};
use crate::snapshot::SnapshotScheduler;
use parking_lot::Mutex;
use std::sync::Arc;
use storesync_backend::{
    ConnectionListener, ConnectionTransition, CredentialSource, IdentityEvent, IdentityListener,
    RecordChangeSet, ReplicaEvent, ReplicaHandle, ReplicaListener, SyncBackend,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Counters maintained by the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Token refreshes observed via identity events.
    pub token_refreshes: u64,
    /// Completed re-open cycles.
    pub reopens: u64,
    /// Successful snapshot iterations.
    pub snapshots_taken: u64,
    /// Record-change batches received.
    pub record_change_events: u64,
    /// Completed client-reset episodes.
    pub reset_episodes: u32,
}

/// Requests shutdown of a running client. Cheap to clone and safe to use
/// from signal handlers or other tasks.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Asks the event loop to stop. The current snapshot delay is
    /// short-circuited and the replica is closed on the way out.
    pub fn request_shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// The sync client.
pub struct SyncClient<B: SyncBackend, C: CredentialSource> {
    backend: Arc<B>,
    credentials: Arc<C>,
    config: ClientConfig,
    session: Arc<SessionManager<B>>,
    lifecycle: ReplicaLifecycle<B, C>,
    monitor: ConnectionMonitor,
    reset: ClientResetCoordinator,
    change_subscribers: Mutex<Vec<UnboundedSender<RecordChangeSet>>>,
    stats: ClientStats,
    listeners: Option<ReplicaListeners>,
    identity_events: Option<IdentityListener>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<B: SyncBackend, C: CredentialSource> SyncClient<B, C> {
    /// Creates a client. Nothing touches the backend until
    /// [`start`](Self::start) or [`run`](Self::run).
    pub fn new(backend: Arc<B>, credentials: Arc<C>, config: ClientConfig) -> Self {
        let session = Arc::new(SessionManager::new(Arc::clone(&backend)));
        let lifecycle = ReplicaLifecycle::new(
            Arc::clone(&backend),
            Arc::clone(&credentials),
            Arc::clone(&session),
            config.clone(),
        );
        let monitor = ConnectionMonitor::new(config.failed_reconnect_alert_threshold);
        let reset = ClientResetCoordinator::new(select_reset_mode(config.read_only));
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            credentials,
            config,
            session,
            lifecycle,
            monitor,
            reset,
            change_subscribers: Mutex::new(Vec::new()),
            stats: ClientStats::default(),
            listeners: None,
            identity_events: None,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Logs in (unless offline) and opens the replica.
    ///
    /// This is the startup path: a failure here is the one condition under
    /// which the process is expected to exit.
    pub async fn start(&mut self) -> SessionResult<()> {
        if self.listeners.is_some() {
            return Ok(());
        }
        if !self.config.offline_mode {
            let token = self.credentials.fetch_access_token().await?;
            self.session.login(token).await?;
            self.identity_events = self.session.take_identity_listener();
        }
        self.listeners = Some(self.lifecycle.open().await?);
        Ok(())
    }

    /// Runs the event loop until shutdown is requested.
    ///
    /// Errors after startup never end the loop; they are logged and the
    /// client keeps serving whatever still works.
    pub async fn run(&mut self) -> SessionResult<()> {
        self.start().await?;
        let ReplicaListeners {
            replica,
            connection,
        } = match self.listeners.take() {
            Some(listeners) => listeners,
            None => return Ok(()),
        };
        let mut replica_rx = Some(replica);
        let mut connection_rx = connection;
        let mut identity_rx = self.identity_events.take();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut scheduler = SnapshotScheduler::new(Arc::clone(&self.backend), &self.config);

        info!(
            offline = self.config.offline_mode,
            snapshots = scheduler.is_active(),
            "sync client running"
        );
        loop {
            if *shutdown_rx.borrow() {
                info!("shutdown requested");
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {}

                _ = scheduler.tick() => {
                    let handle = self.lifecycle.handle();
                    if scheduler.run_once(handle.as_ref()).await.is_some() {
                        self.stats.snapshots_taken += 1;
                    }
                }

                event = next_identity(&mut identity_rx) => match event {
                    Some(_) => {
                        if let Some(update) = self.session.handle_identity_event() {
                            if update.token_refreshed {
                                self.stats.token_refreshes += 1;
                            }
                            if update.outcome == IdentityOutcome::Ended {
                                identity_rx = None;
                            }
                        }
                    }
                    None => {
                        debug!("identity event channel closed");
                        identity_rx = None;
                    }
                },

                event = next_replica(&mut replica_rx) => match event {
                    Some(event) => {
                        if let Some(reopened) = self.dispatch_replica_event(event).await {
                            let ReopenedSession { listeners, identity_listener } = reopened;
                            replica_rx = Some(listeners.replica);
                            connection_rx = listeners.connection;
                            identity_rx = identity_listener;
                        }
                    }
                    None => {
                        debug!("replica event channel closed");
                        replica_rx = None;
                    }
                },

                transition = next_connection(&mut connection_rx) => match transition {
                    Some(transition) => {
                        self.monitor.observe(transition);
                    }
                    None => connection_rx = None,
                },
            }
        }

        self.lifecycle.close().await;
        info!("sync client stopped");
        Ok(())
    }

    async fn dispatch_replica_event(&mut self, event: ReplicaEvent) -> Option<ReopenedSession> {
        match event {
            ReplicaEvent::SyncError(info) => {
                match self.lifecycle.handle_sync_error(&info).await {
                    Ok(Some(reopened)) => {
                        self.stats.reopens += 1;
                        return Some(reopened);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(
                            error = %e,
                            "recovery after session error failed; replica remains closed"
                        );
                    }
                }
            }
            ReplicaEvent::RecordsChanged(set) => {
                debug!(
                    kind = set.kind.as_str(),
                    insertions = set.insertions,
                    modifications = set.modifications,
                    deletions = set.deletions,
                    "records changed"
                );
                self.stats.record_change_events += 1;
                self.emit_change(set);
            }
            ReplicaEvent::ResetBefore => self.reset.on_before(),
            ReplicaEvent::ResetAfter => {
                self.reset.on_after();
                self.stats.reset_episodes = self.reset.episodes_completed();
            }
        }
        None
    }

    fn emit_change(&self, set: RecordChangeSet) {
        let mut subscribers = self.change_subscribers.lock();
        subscribers.retain(|tx| tx.send(set).is_ok());
    }

    /// Subscribes to committed record-change batches. Disconnected
    /// subscribers are dropped on the next emit.
    pub fn subscribe_changes(&self) -> UnboundedReceiver<RecordChangeSet> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.change_subscribers.lock().push(tx);
        rx
    }

    /// A handle for requesting shutdown from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    /// The configuration this client runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True while a logged-in session exists.
    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    /// The current identity, if logged in.
    pub fn identity(&self) -> Option<storesync_backend::Identity> {
        self.session.identity()
    }

    /// A clone of the open replica handle, if any.
    pub fn replica_handle(&self) -> Option<ReplicaHandle> {
        self.lifecycle.handle()
    }

    /// Completed re-open cycles.
    pub fn reopens_completed(&self) -> u64 {
        self.lifecycle.reopens_completed()
    }
}

async fn next_identity(rx: &mut Option<IdentityListener>) -> Option<IdentityEvent> {
    match rx {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_replica(rx: &mut Option<ReplicaListener>) -> Option<ReplicaEvent> {
    match rx {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_connection(rx: &mut Option<ConnectionListener>) -> Option<ConnectionTransition> {
    match rx {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_backend::{LoopbackBackend, StaticCredentialSource, StoreId};

    fn client(
        config: ClientConfig,
    ) -> (
        Arc<LoopbackBackend>,
        SyncClient<LoopbackBackend, StaticCredentialSource>,
    ) {
        let backend = Arc::new(LoopbackBackend::new());
        let credentials = Arc::new(StaticCredentialSource::new("jwt"));
        let client = SyncClient::new(Arc::clone(&backend), credentials, config);
        (backend, client)
    }

    #[tokio::test]
    async fn startup_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, mut client) = client(ClientConfig::new(StoreId::random(), dir.path()));
        backend.set_next_login_error("bad jwt");
        assert!(client.start().await.is_err());
        assert!(!client.is_logged_in());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, mut client) = client(ClientConfig::new(StoreId::random(), dir.path()));
        client.start().await.unwrap();
        client.start().await.unwrap();
        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.login_count(), 1);
    }

    #[tokio::test]
    async fn offline_start_needs_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("restore.snap");
        std::fs::write(&snapshot, b"").unwrap();
        let config =
            ClientConfig::new(StoreId::random(), dir.path()).with_offline_restore(&snapshot);
        let (backend, mut client) = client(config);

        client.start().await.unwrap();
        assert!(!client.is_logged_in());
        assert!(client.replica_handle().is_some());
        assert_eq!(backend.login_count(), 0);
    }

    #[tokio::test]
    async fn offline_run_takes_no_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("restore.snap");
        std::fs::write(&snapshot, b"").unwrap();
        let config = ClientConfig::new(StoreId::random(), dir.path())
            .with_offline_restore(&snapshot)
            .with_backup_frequency(std::time::Duration::from_millis(1));
        let (backend, mut client) = client(config);
        let shutdown = client.shutdown_handle();

        let (run_result, ()) = tokio::join!(client.run(), async {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            shutdown.request_shutdown();
        });
        run_result.unwrap();

        assert_eq!(backend.snapshot_count(), 0);
        assert_eq!(client.stats().snapshots_taken, 0);
        assert!(!client.config().snapshot_dir.exists());
    }

    #[tokio::test]
    async fn shutdown_requested_before_run_still_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (_backend, mut client) = client(ClientConfig::new(StoreId::random(), dir.path()));
        client.shutdown_handle().request_shutdown();
        client.run().await.unwrap();
        assert!(client.replica_handle().is_none());
    }
}
