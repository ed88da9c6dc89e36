//! # Storesync Records
//!
//! Typed record access for the storesync replica:
//!
//! - The record types synced to this client: [`Store`], [`Kiosk`],
//!   [`Product`]
//! - CBOR encoding/decoding between typed records and the backend's raw
//!   payloads
//! - The store-scoped subscription set declared at replica open
//! - [`ScopedQuery`]: typed reads restricted to one store
//! - Demo-data seeding for local development
//!
//! This crate is deliberately thin: the replica itself (storage, sync, and
//! change notification) lives behind the backend interface.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod models;
mod query;
pub mod scope;
pub mod seed;

pub use codec::{decode, encode, RecordsError, RecordsResult};
pub use models::{Kiosk, Product, Record, Store};
pub use query::ScopedQuery;
