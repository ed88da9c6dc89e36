//! In-process loopback backend.
//!
//! A complete [`SyncBackend`] implementation that runs without a network:
//! the replica is a CBOR file on disk, the single-open invariant is
//! enforced with an advisory file lock, and every event class can be
//! injected programmatically. The test suites and the CLI's local mode run
//! against it.

use crate::backend::{ConnectionListener, IdentityListener, ReplicaListener, SyncBackend};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    AccessToken, ConnectionState, ConnectionTransition, Credentials, Identity, IdentityEvent,
    IdentityState, OpenMode, OpenRequest, RawRecord, RecordChangeSet, RecordKind, ReplicaEvent,
    ReplicaHandle, SyncErrorInfo, WriteOp, SNAPSHOT_SIDECAR_EXTENSION,
};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// File name of the manifest inside a sidecar directory.
const SIDECAR_MANIFEST: &str = "manifest.cbor";

/// On-disk image of the replica contents.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ReplicaImage {
    records: Vec<RawRecord>,
}

/// Metadata written into a snapshot's sidecar directory.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotManifest {
    created_unix_ms: u64,
    source: String,
    record_count: usize,
}

struct UserEntry {
    token: AccessToken,
    state: IdentityState,
    listeners: Vec<UnboundedSender<IdentityEvent>>,
}

struct OpenReplica {
    handle: ReplicaHandle,
    // Held for the advisory lock; released on close.
    _lock_file: File,
    replica_listeners: Vec<UnboundedSender<ReplicaEvent>>,
    connection_listeners: Vec<UnboundedSender<ConnectionTransition>>,
    connection_attach_count: u64,
}

#[derive(Default)]
struct LoopbackState {
    users: HashMap<Uuid, UserEntry>,
    open: Option<OpenReplica>,
    data: BTreeMap<RecordKind, BTreeMap<Uuid, Vec<u8>>>,
    next_login_error: Option<String>,
}

/// The in-process backend.
#[derive(Default)]
pub struct LoopbackBackend {
    state: Mutex<LoopbackState>,
    login_count: AtomicU64,
    open_count: AtomicU64,
    snapshot_count: AtomicU64,
}

impl LoopbackBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `log_in` call fail with the given message.
    pub fn set_next_login_error(&self, message: impl Into<String>) {
        self.state.lock().next_login_error = Some(message.into());
    }

    /// Replaces the identity's access token and notifies its listeners,
    /// as the backend does after a token refresh.
    pub fn rotate_token(&self, identity: &Identity, token: AccessToken) {
        let mut state = self.state.lock();
        if let Some(entry) = state.users.get_mut(&identity.id()) {
            entry.token = token;
            notify_identity_entry(entry);
        }
    }

    /// Delivers an identity event without changing anything, as happens for
    /// events unrelated to the token or lifecycle state.
    pub fn notify_identity(&self, identity: &Identity) {
        let mut state = self.state.lock();
        if let Some(entry) = state.users.get_mut(&identity.id()) {
            notify_identity_entry(entry);
        }
    }

    /// Marks the identity as removed from the backend application and
    /// notifies its listeners.
    pub fn mark_removed(&self, identity: &Identity) {
        let mut state = self.state.lock();
        if let Some(entry) = state.users.get_mut(&identity.id()) {
            entry.state = IdentityState::Removed;
            notify_identity_entry(entry);
        }
    }

    /// Forgets the identity entirely, as if the backend application pruned
    /// the user, and notifies its listeners one last time.
    pub fn forget_identity(&self, identity: &Identity) {
        let mut state = self.state.lock();
        if let Some(mut entry) = state.users.remove(&identity.id()) {
            notify_identity_entry(&mut entry);
        }
    }

    /// Delivers a sync error for the open replica.
    pub fn emit_sync_error(&self, code: u16, message: impl Into<String>) {
        self.emit_replica_event(ReplicaEvent::SyncError(SyncErrorInfo::new(code, message)));
    }

    /// Delivers a connection-state transition for the open replica.
    pub fn emit_connection(&self, previous: ConnectionState, next: ConnectionState) {
        let mut state = self.state.lock();
        if let Some(open) = state.open.as_mut() {
            let transition = ConnectionTransition::new(previous, next);
            open.connection_listeners
                .retain(|tx| tx.send(transition).is_ok());
        }
    }

    /// Delivers a full client-reset episode (pre hook, then post hook).
    pub fn emit_client_reset(&self) {
        self.emit_replica_event(ReplicaEvent::ResetBefore);
        self.emit_replica_event(ReplicaEvent::ResetAfter);
    }

    /// Number of successful logins since creation.
    pub fn login_count(&self) -> u64 {
        self.login_count.load(Ordering::SeqCst)
    }

    /// Number of successful opens since creation.
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Number of snapshot copies since creation.
    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count.load(Ordering::SeqCst)
    }

    /// Number of listeners attached to the identity.
    pub fn identity_listener_count(&self, identity: &Identity) -> usize {
        self.state
            .lock()
            .users
            .get(&identity.id())
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    /// Number of connection-listener attachments for the current open
    /// episode.
    pub fn connection_attach_count(&self) -> u64 {
        self.state
            .lock()
            .open
            .as_ref()
            .map(|open| open.connection_attach_count)
            .unwrap_or(0)
    }

    /// True while a replica is open.
    pub fn replica_is_open(&self) -> bool {
        self.state.lock().open.is_some()
    }

    fn emit_replica_event(&self, event: ReplicaEvent) {
        let mut state = self.state.lock();
        if let Some(open) = state.open.as_mut() {
            open.replica_listeners
                .retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn persist_locked(state: &LoopbackState, path: &Path) -> BackendResult<()> {
        let records: Vec<RawRecord> = state
            .data
            .iter()
            .flat_map(|(kind, by_id)| {
                by_id.iter().map(|(id, payload)| RawRecord {
                    kind: *kind,
                    id: *id,
                    payload: payload.clone(),
                })
            })
            .collect();
        let image = ReplicaImage { records };
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        ciborium::into_writer(&image, file).map_err(|e| BackendError::Codec(e.to_string()))
    }

    fn load_image(path: &Path) -> BackendResult<ReplicaImage> {
        let metadata = fs::metadata(path)?;
        if metadata.len() == 0 {
            return Ok(ReplicaImage::default());
        }
        let file = File::open(path)?;
        ciborium::from_reader(file).map_err(|e| BackendError::Codec(e.to_string()))
    }

    fn verify_open(state: &LoopbackState, handle: &ReplicaHandle) -> BackendResult<PathBuf> {
        match state.open.as_ref() {
            Some(open) if open.handle.id() == handle.id() => {
                Ok(open.handle.path().to_path_buf())
            }
            _ => Err(BackendError::ReplicaClosed),
        }
    }
}

fn notify_identity_entry(entry: &mut UserEntry) {
    entry.listeners.retain(|tx| tx.send(IdentityEvent).is_ok());
}

fn change_entry(
    changes: &mut BTreeMap<RecordKind, RecordChangeSet>,
    kind: RecordKind,
) -> &mut RecordChangeSet {
    changes.entry(kind).or_insert(RecordChangeSet {
        kind,
        insertions: 0,
        modifications: 0,
        deletions: 0,
    })
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl SyncBackend for LoopbackBackend {
    async fn log_in(&self, credentials: Credentials) -> BackendResult<Identity> {
        let mut state = self.state.lock();
        if let Some(message) = state.next_login_error.take() {
            return Err(BackendError::AuthRejected { message });
        }
        let Credentials::Jwt(token) = credentials;
        if token.is_empty() {
            return Err(BackendError::AuthRejected {
                message: "empty token".into(),
            });
        }
        let identity = Identity::new(Uuid::new_v4());
        state.users.insert(
            identity.id(),
            UserEntry {
                token,
                state: IdentityState::LoggedIn,
                listeners: Vec::new(),
            },
        );
        self.login_count.fetch_add(1, Ordering::SeqCst);
        Ok(identity)
    }

    async fn log_out(&self, identity: &Identity) -> BackendResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .users
            .get_mut(&identity.id())
            .ok_or(BackendError::UnknownIdentity { id: identity.id() })?;
        entry.state = IdentityState::LoggedOut;
        notify_identity_entry(entry);
        Ok(())
    }

    fn identity_state(&self, identity: &Identity) -> Option<IdentityState> {
        self.state
            .lock()
            .users
            .get(&identity.id())
            .map(|entry| entry.state)
    }

    fn access_token(&self, identity: &Identity) -> Option<AccessToken> {
        self.state
            .lock()
            .users
            .get(&identity.id())
            .map(|entry| entry.token.clone())
    }

    fn watch_identity(&self, identity: &Identity) -> IdentityListener {
        let (tx, listener) = IdentityListener::channel();
        let mut state = self.state.lock();
        if let Some(entry) = state.users.get_mut(&identity.id()) {
            entry.listeners.push(tx);
        }
        listener
    }

    async fn open(&self, request: OpenRequest) -> BackendResult<(ReplicaHandle, ReplicaListener)> {
        let mut state = self.state.lock();
        if let Some(open) = state.open.as_ref() {
            return Err(BackendError::ReplicaAlreadyOpen {
                path: open.handle.path().to_path_buf(),
            });
        }

        let subscriptions = match &request.mode {
            OpenMode::Synced {
                identity,
                subscriptions,
                ..
            } => {
                let entry = state
                    .users
                    .get(&identity.id())
                    .ok_or(BackendError::UnknownIdentity { id: identity.id() })?;
                if entry.state != IdentityState::LoggedIn {
                    return Err(BackendError::IdentityNotActive);
                }
                subscriptions.clone()
            }
            OpenMode::Restored => {
                if !request.path.is_file() {
                    return Err(BackendError::RestoreSourceMissing {
                        path: request.path.clone(),
                    });
                }
                Vec::new()
            }
        };

        if let Some(parent) = request.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&request.path)?;
        lock_file.try_lock_exclusive().map_err(|e| {
            let contended = fs2::lock_contended_error();
            if e.kind() == contended.kind() || e.kind() == ErrorKind::WouldBlock {
                BackendError::ReplicaLocked {
                    path: request.path.clone(),
                }
            } else {
                BackendError::Io(e)
            }
        })?;

        let image = Self::load_image(&request.path)?;
        state.data.clear();
        for record in image.records {
            state
                .data
                .entry(record.kind)
                .or_default()
                .insert(record.id, record.payload);
        }

        let handle = ReplicaHandle::new(
            request.path.clone(),
            request.mode.replica_mode(),
            subscriptions,
        );
        let (tx, listener) = ReplicaListener::channel();
        state.open = Some(OpenReplica {
            handle: handle.clone(),
            _lock_file: lock_file,
            replica_listeners: vec![tx],
            connection_listeners: Vec::new(),
            connection_attach_count: 0,
        });
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok((handle, listener))
    }

    async fn close(&self, handle: &ReplicaHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let matches_open = state
            .open
            .as_ref()
            .is_some_and(|open| open.handle.id() == handle.id());
        if !matches_open {
            return Ok(());
        }
        if let Err(e) = Self::persist_locked(&state, handle.path()) {
            tracing::warn!(error = %e, "could not persist replica on close");
        }
        // Dropping the open episode releases the file lock and closes the
        // event channels.
        state.open = None;
        Ok(())
    }

    async fn write(&self, handle: &ReplicaHandle, ops: Vec<WriteOp>) -> BackendResult<()> {
        let mut state = self.state.lock();
        let path = Self::verify_open(&state, handle)?;

        let mut changes: BTreeMap<RecordKind, RecordChangeSet> = BTreeMap::new();

        for op in ops {
            match op {
                WriteOp::Put { kind, id, payload } => {
                    let replaced = state
                        .data
                        .entry(kind)
                        .or_default()
                        .insert(id, payload)
                        .is_some();
                    if replaced {
                        change_entry(&mut changes, kind).modifications += 1;
                    } else {
                        change_entry(&mut changes, kind).insertions += 1;
                    }
                }
                WriteOp::Delete { kind, id } => {
                    let removed = state
                        .data
                        .get_mut(&kind)
                        .and_then(|by_id| by_id.remove(&id))
                        .is_some();
                    if removed {
                        change_entry(&mut changes, kind).deletions += 1;
                    }
                }
                WriteOp::ClearAll => {
                    let kinds: Vec<(RecordKind, usize)> = state
                        .data
                        .iter()
                        .map(|(kind, by_id)| (*kind, by_id.len()))
                        .collect();
                    for (kind, count) in kinds {
                        if count > 0 {
                            change_entry(&mut changes, kind).deletions += count;
                        }
                    }
                    state.data.clear();
                }
            }
        }

        Self::persist_locked(&state, &path)?;

        if let Some(open) = state.open.as_mut() {
            for set in changes.into_values() {
                let event = ReplicaEvent::RecordsChanged(set);
                open.replica_listeners
                    .retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
        Ok(())
    }

    async fn read(&self, handle: &ReplicaHandle, kind: RecordKind) -> BackendResult<Vec<RawRecord>> {
        let state = self.state.lock();
        Self::verify_open(&state, handle)?;
        Ok(state
            .data
            .get(&kind)
            .map(|by_id| {
                by_id
                    .iter()
                    .map(|(id, payload)| RawRecord {
                        kind,
                        id: *id,
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn watch_connection(&self, handle: &ReplicaHandle) -> BackendResult<ConnectionListener> {
        let mut state = self.state.lock();
        Self::verify_open(&state, handle)?;
        let (tx, listener) = ConnectionListener::channel();
        if let Some(open) = state.open.as_mut() {
            open.connection_listeners.push(tx);
            open.connection_attach_count += 1;
        }
        Ok(listener)
    }

    async fn copy_snapshot(&self, handle: &ReplicaHandle, destination: &Path) -> BackendResult<()> {
        let state = self.state.lock();
        let path = Self::verify_open(&state, handle)?;
        Self::persist_locked(&state, &path)?;
        let record_count = state.data.values().map(BTreeMap::len).sum();
        drop(state);

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&path, destination)?;

        let sidecar = destination.with_extension(SNAPSHOT_SIDECAR_EXTENSION);
        fs::create_dir_all(&sidecar)?;
        let manifest = SnapshotManifest {
            created_unix_ms: unix_millis(),
            source: path.display().to_string(),
            record_count,
        };
        let file = File::create(sidecar.join(SIDECAR_MANIFEST))?;
        ciborium::into_writer(&manifest, file).map_err(|e| BackendError::Codec(e.to_string()))?;

        self.snapshot_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
