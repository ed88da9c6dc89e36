//! Backend and credential trait seams.
//!
//! These traits abstract the remote sync service and the identity provider,
//! allowing different implementations (a wire backend, the in-process
//! loopback, test doubles).

use crate::error::{BackendResult, CredentialError};
use crate::types::{
    AccessToken, ConnectionTransition, Credentials, Identity, IdentityEvent, IdentityState,
    OpenRequest, RawRecord, RecordKind, ReplicaEvent, ReplicaHandle, WriteOp,
};
use std::path::Path;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// An attached identity listener.
///
/// Events arrive whenever anything identity-related happens (token refresh,
/// logout, removal). Dropping the listener detaches it.
#[derive(Debug)]
pub struct IdentityListener {
    rx: UnboundedReceiver<IdentityEvent>,
}

impl IdentityListener {
    /// Creates a sender/listener pair.
    pub fn channel() -> (UnboundedSender<IdentityEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Receives the next event; `None` once the backend side is gone.
    pub async fn recv(&mut self) -> Option<IdentityEvent> {
        self.rx.recv().await
    }
}

/// An attached replica listener carrying sync errors, record changes, and
/// client-reset hooks for one open episode.
#[derive(Debug)]
pub struct ReplicaListener {
    rx: UnboundedReceiver<ReplicaEvent>,
}

impl ReplicaListener {
    /// Creates a sender/listener pair.
    pub fn channel() -> (UnboundedSender<ReplicaEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Receives the next event; `None` once the replica is closed.
    pub async fn recv(&mut self) -> Option<ReplicaEvent> {
        self.rx.recv().await
    }
}

/// An attached connection listener delivering `(previous, next)` state
/// pairs.
#[derive(Debug)]
pub struct ConnectionListener {
    rx: UnboundedReceiver<ConnectionTransition>,
}

impl ConnectionListener {
    /// Creates a sender/listener pair.
    pub fn channel() -> (UnboundedSender<ConnectionTransition>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Receives the next transition; `None` once the replica is closed.
    pub async fn recv(&mut self) -> Option<ConnectionTransition> {
        self.rx.recv().await
    }
}

/// The remote synchronization service, consumed through narrow primitives.
///
/// Reconnection, retry of transient transport failures, and client-reset
/// mechanics are the backend's own responsibility; the client only observes
/// the events the backend delivers.
pub trait SyncBackend: Send + Sync {
    /// Exchanges credentials for an authenticated identity.
    async fn log_in(&self, credentials: Credentials) -> BackendResult<Identity>;

    /// Requests logout. Local session teardown happens when the identity
    /// listener reports the transition, not synchronously here.
    async fn log_out(&self, identity: &Identity) -> BackendResult<()>;

    /// Current lifecycle state of an identity; `None` if the identity is
    /// unknown to the backend.
    fn identity_state(&self, identity: &Identity) -> Option<IdentityState>;

    /// The identity's current access token, if it holds one.
    fn access_token(&self, identity: &Identity) -> Option<AccessToken>;

    /// Attaches a listener for identity-related events.
    fn watch_identity(&self, identity: &Identity) -> IdentityListener;

    /// Opens the local replica and returns its handle together with the
    /// replica event listener for this open episode.
    async fn open(&self, request: OpenRequest) -> BackendResult<(ReplicaHandle, ReplicaListener)>;

    /// Closes an open replica. Closing an already-closed replica is a
    /// no-op.
    async fn close(&self, handle: &ReplicaHandle) -> BackendResult<()>;

    /// Applies a write transaction to the open replica.
    async fn write(&self, handle: &ReplicaHandle, ops: Vec<WriteOp>) -> BackendResult<()>;

    /// Reads all records of one type from the open replica.
    async fn read(&self, handle: &ReplicaHandle, kind: RecordKind) -> BackendResult<Vec<RawRecord>>;

    /// Attaches a listener for connection-state transitions.
    fn watch_connection(&self, handle: &ReplicaHandle) -> BackendResult<ConnectionListener>;

    /// Copies the open replica to `destination` as a point-in-time
    /// snapshot, together with its sidecar metadata directory.
    async fn copy_snapshot(&self, handle: &ReplicaHandle, destination: &Path) -> BackendResult<()>;
}

/// Supplies short-lived access tokens on demand.
pub trait CredentialSource: Send + Sync {
    /// Fetches a fresh access token from the identity provider.
    async fn fetch_access_token(&self) -> Result<AccessToken, CredentialError>;
}
