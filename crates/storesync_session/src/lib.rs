//! # Storesync Session Engine
//!
//! The sync session lifecycle engine: everything between "process started"
//! and "local replica stays in sync, survives token expiry, and keeps
//! pruned backups".
//!
//! This crate provides:
//! - Session ownership: login/logout, token-rotation detection,
//!   event-driven teardown ([`SessionManager`])
//! - Sync error classification ([`classify`])
//! - Connection-state observation ([`ConnectionMonitor`])
//! - Client-reset policy and hook observation ([`ClientResetCoordinator`])
//! - Replica lifecycle with the re-open protocol ([`ReplicaLifecycle`])
//! - Periodic snapshots with retention pruning ([`SnapshotScheduler`],
//!   [`RetentionPruner`])
//! - The single-task event loop owning all of it ([`SyncClient`])
//!
//! ## Key invariants
//!
//! - At most one replica is open per process
//! - Session state is cleared in exactly one place (the identity handler),
//!   except for the re-open protocol's synchronous teardown
//! - At most one re-open cycle is in flight at any time
//! - After a pruning pass at most `max_retained_snapshots` snapshots remain,
//!   and they are exactly the newest ones
//! - A handled error never exits the process; only startup failures do

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod client;
mod config;
mod connection;
mod error;
mod replica;
mod reset;
mod retention;
mod session;
mod snapshot;

pub use classify::{classify, ErrorCategory};
pub use client::{ClientStats, ShutdownHandle, SyncClient};
pub use config::{
    ClientConfig, DEFAULT_BACKUP_FREQUENCY_HOURS, DEFAULT_FAILED_RECONNECT_ALERT_THRESHOLD,
    DEFAULT_MAX_RETAINED_SNAPSHOTS,
};
pub use connection::{interpret, ConnectionEvent, ConnectionMonitor};
pub use error::{SessionError, SessionResult};
pub use replica::{ReopenedSession, ReplicaLifecycle, ReplicaListeners};
pub use reset::{select_reset_mode, ClientResetCoordinator};
pub use retention::{
    BackupSnapshot, PruneOutcome, RetentionPruner, SnapshotKey, SNAPSHOT_EXTENSION,
};
pub use session::{IdentityOutcome, IdentityUpdate, SessionManager, SessionState};
pub use snapshot::SnapshotScheduler;
