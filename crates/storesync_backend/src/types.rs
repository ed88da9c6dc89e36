//! Shared types exchanged between the sync client and a backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Extension of the sidecar metadata directory the backend manages next to
/// each snapshot file, sharing the snapshot's base name.
pub const SNAPSHOT_SIDECAR_EXTENSION: &str = "meta";

/// Identifies the tenant/store whose records are synced to this client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Wraps an existing identifier.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A short-lived access token issued by the credential source or backend.
///
/// The token value is wiped from memory on drop and never appears in
/// `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Exposes the raw token value for presentation to the backend.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the token value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Credentials presented to the backend at login.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Credentials {
    /// A JWT issued by the external credential source.
    Jwt(AccessToken),
}

impl Credentials {
    /// Builds JWT credentials from an access token.
    pub fn jwt(token: AccessToken) -> Self {
        Self::Jwt(token)
    }
}

/// An opaque handle to an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    id: Uuid,
}

impl Identity {
    /// Creates an identity handle with the given id.
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    /// Returns the identity id.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Lifecycle state of an identity as reported by the backend.
///
/// Marked non-exhaustive: backends have grown states before, and consumers
/// must treat anything unrecognized as an anomaly rather than silently
/// succeeding.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// The identity holds a valid session.
    LoggedIn,
    /// The identity has been logged out.
    LoggedOut,
    /// The identity was removed from the backend application.
    Removed,
}

/// Transport connection state of the sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection to the backend.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The session is connected.
    Connected,
}

/// A `(previous, next)` connection-state pair delivered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTransition {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub next: ConnectionState,
}

impl ConnectionTransition {
    /// Builds a transition pair.
    pub fn new(previous: ConnectionState, next: ConnectionState) -> Self {
        Self { previous, next }
    }
}

/// The record types stored in the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    /// A retail store.
    Store,
    /// A kiosk within a store.
    Kiosk,
    /// A product stocked by a store.
    Product,
}

impl RecordKind {
    /// Stable name used in subscription declarations and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Store => "store",
            RecordKind::Kiosk => "kiosk",
            RecordKind::Product => "product",
        }
    }
}

/// A declared sync subscription: a named scope over one record type,
/// restricted to a single store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Subscription name; naming each subscription keeps later removal
    /// manageable.
    pub name: String,
    /// The record type this subscription covers.
    pub kind: RecordKind,
    /// The store whose records are in scope.
    pub store_id: StoreId,
}

impl SubscriptionSpec {
    /// Builds a subscription spec.
    pub fn new(name: impl Into<String>, kind: RecordKind, store_id: StoreId) -> Self {
        Self {
            name: name.into(),
            kind,
            store_id,
        }
    }
}

/// Resolution policy applied when local and remote histories diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientResetMode {
    /// Discard local unsynced changes; suitable for read-mostly clients.
    DiscardUnsyncedChanges,
    /// Attempt recovery of local unsynced changes, discarding on failure;
    /// suitable for read-write clients.
    RecoverOrDiscardUnsyncedChanges,
}

/// How the replica is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaMode {
    /// Live replica kept in sync with the backend.
    Synced,
    /// Replica restored from a local snapshot; no sync session.
    Restored,
}

/// Open-time parameters that differ between the two replica modes.
#[derive(Debug, Clone)]
pub enum OpenMode {
    /// Open a live replica; requires an authenticated identity.
    Synced {
        /// The logged-in identity owning the sync session.
        identity: Identity,
        /// The full subscription set, re-declared on every open.
        subscriptions: Vec<SubscriptionSpec>,
        /// Divergence resolution policy for this session.
        reset_mode: ClientResetMode,
    },
    /// Open a previously backed-up replica file directly.
    Restored,
}

impl OpenMode {
    /// The corresponding replica mode.
    pub fn replica_mode(&self) -> ReplicaMode {
        match self {
            OpenMode::Synced { .. } => ReplicaMode::Synced,
            OpenMode::Restored => ReplicaMode::Restored,
        }
    }
}

/// A request to open the local replica.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Path of the replica file to open.
    pub path: PathBuf,
    /// Mode-specific parameters.
    pub mode: OpenMode,
}

/// A handle to an open replica.
///
/// The handle is cheap to clone; at most one open replica exists per
/// process, enforced by the backend.
#[derive(Debug, Clone)]
pub struct ReplicaHandle {
    id: Uuid,
    path: PathBuf,
    mode: ReplicaMode,
    subscriptions: Vec<SubscriptionSpec>,
}

impl ReplicaHandle {
    /// Creates a handle for a freshly opened replica.
    pub fn new(path: PathBuf, mode: ReplicaMode, subscriptions: Vec<SubscriptionSpec>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            mode,
            subscriptions,
        }
    }

    /// Unique id of this open episode.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path of the replica file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Mode the replica was opened in.
    pub fn mode(&self) -> ReplicaMode {
        self.mode
    }

    /// The subscription set declared at open time.
    pub fn subscriptions(&self) -> &[SubscriptionSpec] {
        &self.subscriptions
    }
}

/// An identity-related event.
///
/// Carries no payload: the backend does not report what changed, so
/// consumers query the identity handle and compare against their own
/// snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityEvent;

/// A sync error reported by the backend for the open replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncErrorInfo {
    /// Numeric protocol error code.
    pub code: u16,
    /// Backend-reported message.
    pub message: String,
}

impl SyncErrorInfo {
    /// Builds a sync error report.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A committed batch of record changes for one record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChangeSet {
    /// The record type that changed.
    pub kind: RecordKind,
    /// Number of records inserted.
    pub insertions: usize,
    /// Number of records modified.
    pub modifications: usize,
    /// Number of records deleted.
    pub deletions: usize,
}

/// Events delivered for an open replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaEvent {
    /// A sync error was reported for the session.
    SyncError(SyncErrorInfo),
    /// Committed record changes.
    RecordsChanged(RecordChangeSet),
    /// A client reset is about to run; local unsynced writes past this
    /// point may be discarded.
    ResetBefore,
    /// A client reset completed and histories converged.
    ResetAfter,
}

/// A single write operation inside a transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or replace a record.
    Put {
        /// Record type.
        kind: RecordKind,
        /// Record id.
        id: Uuid,
        /// Encoded record payload.
        payload: Vec<u8>,
    },
    /// Delete a record if present.
    Delete {
        /// Record type.
        kind: RecordKind,
        /// Record id.
        id: Uuid,
    },
    /// Delete every record of every type.
    ClearAll,
}

/// A stored record as returned by the backend: type, id, and encoded
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Record type.
    pub kind: RecordKind,
    /// Record id.
    pub id: Uuid,
    /// Encoded record payload.
    pub payload: Vec<u8>,
}
