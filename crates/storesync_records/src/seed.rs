//! Demo-data seeding for local development.
//!
//! Values are deterministic so repeated seeding of a clean replica yields
//! identical contents.

use crate::codec::{encode, RecordsResult};
use crate::models::{Kiosk, Product, Store};
use crate::query::ScopedQuery;
use storesync_backend::{ReplicaHandle, StoreId, SyncBackend, WriteOp};
use tracing::info;
use uuid::Uuid;

/// How many products and kiosks the demo data set contains.
pub const DEMO_COUNT: usize = 10;

/// Deletes every record in the replica.
pub async fn clear_all<B: SyncBackend>(backend: &B, handle: &ReplicaHandle) -> RecordsResult<()> {
    backend.write(handle, vec![WriteOp::ClearAll]).await?;
    info!("cleared replica contents");
    Ok(())
}

/// Populates the replica with the demo store: products first, then kiosks
/// presenting them, then the store record tying it together.
pub async fn seed_demo_data<B: SyncBackend>(
    backend: &B,
    handle: &ReplicaHandle,
    store_id: StoreId,
) -> RecordsResult<()> {
    let mut ops = Vec::new();

    let mut product_ids = Vec::with_capacity(DEMO_COUNT);
    for i in 1..=DEMO_COUNT {
        let product = Product {
            id: Uuid::new_v4(),
            store_id,
            name: format!("product{i}"),
            price: 5.0 + 0.75 * i as f64,
            num_in_stock: DEMO_COUNT as i64,
        };
        product_ids.push(product.id);
        let raw = encode(&product)?;
        ops.push(WriteOp::Put {
            kind: raw.kind,
            id: raw.id,
            payload: raw.payload,
        });
    }

    let mut kiosk_ids = Vec::with_capacity(DEMO_COUNT);
    for _ in 0..DEMO_COUNT {
        let kiosk = Kiosk {
            id: Uuid::new_v4(),
            store_id,
            products: product_ids.clone(),
        };
        kiosk_ids.push(kiosk.id);
        let raw = encode(&kiosk)?;
        ops.push(WriteOp::Put {
            kind: raw.kind,
            id: raw.id,
            payload: raw.payload,
        });
    }

    let store = Store {
        id: store_id,
        kiosks: kiosk_ids,
    };
    let raw = encode(&store)?;
    ops.push(WriteOp::Put {
        kind: raw.kind,
        id: raw.id,
        payload: raw.payload,
    });

    backend.write(handle, ops).await?;
    info!(products = DEMO_COUNT, kiosks = DEMO_COUNT, "seeded demo data");
    Ok(())
}

/// Decrements stock levels product-by-product, one write per product, to
/// simulate updates arriving in separate batches.
pub async fn update_stock<B: SyncBackend>(
    backend: &B,
    handle: &ReplicaHandle,
    store_id: StoreId,
) -> RecordsResult<()> {
    let products = ScopedQuery::new(backend, handle, store_id).products().await?;
    for (i, mut product) in products.into_iter().enumerate() {
        product.num_in_stock = (product.num_in_stock - (i as i64 % 4)).max(0);
        let raw = encode(&product)?;
        backend
            .write(
                handle,
                vec![WriteOp::Put {
                    kind: raw.kind,
                    id: raw.id,
                    payload: raw.payload,
                }],
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_backend::{
        AccessToken, ClientResetMode, Credentials, LoopbackBackend, OpenMode, OpenRequest,
        SyncBackend,
    };

    async fn open_backend(dir: &std::path::Path) -> (LoopbackBackend, ReplicaHandle) {
        let backend = LoopbackBackend::new();
        let identity = backend
            .log_in(Credentials::jwt(AccessToken::new("token")))
            .await
            .unwrap();
        let (handle, _events) = backend
            .open(OpenRequest {
                path: dir.join("store.db"),
                mode: OpenMode::Synced {
                    identity,
                    subscriptions: Vec::new(),
                    reset_mode: ClientResetMode::RecoverOrDiscardUnsyncedChanges,
                },
            })
            .await
            .unwrap();
        (backend, handle)
    }

    #[tokio::test]
    async fn seeding_populates_all_record_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, handle) = open_backend(dir.path()).await;
        let store_id = StoreId::random();

        seed_demo_data(&backend, &handle, store_id).await.unwrap();

        let query = ScopedQuery::new(&backend, &handle, store_id);
        let store = query.store().await.unwrap().unwrap();
        assert_eq!(store.kiosks.len(), DEMO_COUNT);
        assert_eq!(query.kiosks().await.unwrap().len(), DEMO_COUNT);
        assert_eq!(query.products().await.unwrap().len(), DEMO_COUNT);
    }

    #[tokio::test]
    async fn queries_filter_by_store() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, handle) = open_backend(dir.path()).await;
        let ours = StoreId::random();
        let theirs = StoreId::random();

        seed_demo_data(&backend, &handle, ours).await.unwrap();
        seed_demo_data(&backend, &handle, theirs).await.unwrap();

        let query = ScopedQuery::new(&backend, &handle, ours);
        assert_eq!(query.products().await.unwrap().len(), DEMO_COUNT);
        assert!(query
            .products()
            .await
            .unwrap()
            .iter()
            .all(|p| p.store_id == ours));
    }

    #[tokio::test]
    async fn stock_updates_never_go_negative() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, handle) = open_backend(dir.path()).await;
        let store_id = StoreId::random();
        seed_demo_data(&backend, &handle, store_id).await.unwrap();

        // Drive stock toward zero.
        for _ in 0..20 {
            update_stock(&backend, &handle, store_id).await.unwrap();
        }

        let products = ScopedQuery::new(&backend, &handle, store_id)
            .products()
            .await
            .unwrap();
        assert!(products.iter().all(|p| p.num_in_stock >= 0));
    }

    #[tokio::test]
    async fn clear_all_empties_the_replica() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, handle) = open_backend(dir.path()).await;
        let store_id = StoreId::random();
        seed_demo_data(&backend, &handle, store_id).await.unwrap();

        clear_all(&backend, &handle).await.unwrap();

        let query = ScopedQuery::new(&backend, &handle, store_id);
        assert!(query.store().await.unwrap().is_none());
        assert!(query.products().await.unwrap().is_empty());
    }
}
