//! # Storesync Backend Interfaces
//!
//! Narrow interfaces to the external collaborators of the storesync client:
//!
//! - [`SyncBackend`]: the remote synchronization service (open/close the
//!   local replica, subscriptions, writes, snapshot copies, and event
//!   listener registration)
//! - [`CredentialSource`]: the identity provider issuing short-lived access
//!   tokens
//! - Shared types: identities, access tokens, connection and identity
//!   states, subscriptions, replica handles, and backend-delivered events
//!
//! The session lifecycle engine consumes these traits only; it never sees a
//! wire protocol. [`LoopbackBackend`] is a complete in-process
//! implementation (replica persisted as a CBOR file, advisory file locking,
//! channel-delivered events) used by the test suites and by the CLI for
//! local operation.
//!
//! ## Listener model
//!
//! Listener registration returns an owned receiver ([`IdentityListener`],
//! [`ReplicaListener`], [`ConnectionListener`]). Dropping the receiver is
//! the detach operation, so detachment is type-checked and a listener can
//! never be left dangling after its owner is torn down.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Backends are driven from a single task; no `Send` bound is imposed on
// trait futures.
#![allow(async_fn_in_trait)]

mod backend;
mod credentials;
mod error;
mod loopback;
mod types;

pub use backend::{
    ConnectionListener, CredentialSource, IdentityListener, ReplicaListener, SyncBackend,
};
pub use credentials::StaticCredentialSource;
pub use error::{BackendError, BackendResult, CredentialError};
pub use loopback::LoopbackBackend;
pub use types::{
    AccessToken, ClientResetMode, ConnectionState, ConnectionTransition, Credentials, Identity,
    IdentityEvent, IdentityState, OpenMode, OpenRequest, RawRecord, RecordChangeSet, RecordKind,
    ReplicaEvent, ReplicaHandle, ReplicaMode, StoreId, SubscriptionSpec, SyncErrorInfo, WriteOp,
    SNAPSHOT_SIDECAR_EXTENSION,
};
