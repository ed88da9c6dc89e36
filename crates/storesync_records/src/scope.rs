//! The subscription set declared when the replica is opened.

use storesync_backend::{RecordKind, StoreId, SubscriptionSpec};

/// Builds the full subscription set for one store.
///
/// Each subscription is named so later removal stays manageable. The set is
/// re-declared in full on every open; re-declaration is idempotent on the
/// backend side.
pub fn subscription_set(store_id: StoreId) -> Vec<SubscriptionSpec> {
    vec![
        SubscriptionSpec::new("store", RecordKind::Store, store_id),
        SubscriptionSpec::new("kiosks-in-store", RecordKind::Kiosk, store_id),
        SubscriptionSpec::new("products-in-store", RecordKind::Product, store_id),
    ]
}
