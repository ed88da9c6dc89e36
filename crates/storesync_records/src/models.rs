//! The record types synced to this client.
//!
//! Simplified retail inventory: a store holds kiosks, kiosks present
//! products, products carry price and stock. Every record except the store
//! itself carries the owning `store_id`, which is what the sync
//! subscriptions filter on.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storesync_backend::{RecordKind, StoreId};
use uuid::Uuid;

/// A typed record stored in the replica.
pub trait Record: Serialize + DeserializeOwned {
    /// The record type tag used by the backend.
    const KIND: RecordKind;

    /// The record's primary key.
    fn record_id(&self) -> Uuid;
}

/// A retail store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Primary key; equals the sync scope identifier.
    pub id: StoreId,
    /// Kiosks belonging to this store.
    pub kiosks: Vec<Uuid>,
}

impl Record for Store {
    const KIND: RecordKind = RecordKind::Store;

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

/// A kiosk within a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kiosk {
    /// Primary key.
    pub id: Uuid,
    /// The store this kiosk belongs to.
    pub store_id: StoreId,
    /// Products presented at this kiosk.
    pub products: Vec<Uuid>,
}

impl Record for Kiosk {
    const KIND: RecordKind = RecordKind::Kiosk;

    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// Current information and inventory for one product in one store.
///
/// Simplified to a complete product (a sandwich, not bread and cheese and
/// lettuce separately).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Primary key.
    pub id: Uuid,
    /// The store stocking this product.
    pub store_id: StoreId,
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Units currently in stock.
    pub num_in_stock: i64,
}

impl Record for Product {
    const KIND: RecordKind = RecordKind::Product;

    fn record_id(&self) -> Uuid {
        self.id
    }
}
