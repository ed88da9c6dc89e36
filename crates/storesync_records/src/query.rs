//! Typed queries over the open replica, scoped to one store.

use crate::codec::{decode, RecordsResult};
use crate::models::{Kiosk, Product, Store};
use storesync_backend::{RecordKind, ReplicaHandle, StoreId, SyncBackend};

/// Read access to the records of a single store.
pub struct ScopedQuery<'a, B: SyncBackend> {
    backend: &'a B,
    handle: &'a ReplicaHandle,
    store_id: StoreId,
}

impl<'a, B: SyncBackend> ScopedQuery<'a, B> {
    /// Creates a query scope over an open replica.
    pub fn new(backend: &'a B, handle: &'a ReplicaHandle, store_id: StoreId) -> Self {
        Self {
            backend,
            handle,
            store_id,
        }
    }

    /// The store record itself, if it has synced.
    pub async fn store(&self) -> RecordsResult<Option<Store>> {
        let raw = self.backend.read(self.handle, RecordKind::Store).await?;
        for record in &raw {
            let store: Store = decode(record)?;
            if store.id == self.store_id {
                return Ok(Some(store));
            }
        }
        Ok(None)
    }

    /// All kiosks in the store.
    pub async fn kiosks(&self) -> RecordsResult<Vec<Kiosk>> {
        let raw = self.backend.read(self.handle, RecordKind::Kiosk).await?;
        let mut kiosks = Vec::with_capacity(raw.len());
        for record in &raw {
            let kiosk: Kiosk = decode(record)?;
            if kiosk.store_id == self.store_id {
                kiosks.push(kiosk);
            }
        }
        Ok(kiosks)
    }

    /// All products stocked by the store.
    pub async fn products(&self) -> RecordsResult<Vec<Product>> {
        let raw = self.backend.read(self.handle, RecordKind::Product).await?;
        let mut products = Vec::with_capacity(raw.len());
        for record in &raw {
            let product: Product = decode(record)?;
            if product.store_id == self.store_id {
                products.push(product);
            }
        }
        Ok(products)
    }
}
