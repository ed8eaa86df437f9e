//! The notification-index bump is atomic, +1 exactly, returned in input
//! order, and leaves the subscription's fencing token untouched.

use chrono::{TimeDelta, Utc};
use dss_geo::{CellId, CellUnion, LatLng};
use dss_models::{Owner, Subscription};
use dss_store::{boxed, MemStore, Repository, Store};
use uuid::Uuid;

fn sub(id: Uuid) -> Subscription {
    let now = Utc::now();
    Subscription {
        id,
        owner: Owner::from("uss1"),
        url: "https://uss1.example.com/notify".to_string(),
        notification_index: 0,
        notify_for_operations: true,
        notify_for_constraints: false,
        implicit: false,
        cells: CellUnion::new(vec![CellId::from_lat_lng_at_level(
            LatLng::new(37.0, -122.0),
            13,
        )]),
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(2)),
        altitude_lo: None,
        altitude_hi: None,
        writer: None,
        version: None,
    }
}

#[tokio::test]
async fn bump_is_plus_one_in_input_order_and_version_stable() {
    let store = MemStore::default();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    for id in [a, b] {
        store
            .transact(|repo: &mut dyn Repository| {
                let s = sub(id);
                boxed(async move { repo.upsert_subscription(s).await })
            })
            .await
            .unwrap();
    }

    let version_before = store
        .transact(|repo: &mut dyn Repository| {
            boxed(async move { repo.get_subscription(a).await })
        })
        .await
        .unwrap()
        .unwrap()
        .version;

    // Bump b first, then a: returned indices must follow the input order.
    let indices = store
        .transact(|repo: &mut dyn Repository| {
            boxed(async move { repo.increment_notification_indices(&[b, a]).await })
        })
        .await
        .unwrap();
    assert_eq!(indices, vec![1, 1]);

    let indices = store
        .transact(|repo: &mut dyn Repository| {
            boxed(async move { repo.increment_notification_indices(&[a, b]).await })
        })
        .await
        .unwrap();
    assert_eq!(indices, vec![2, 2]);

    let after = store
        .transact(|repo: &mut dyn Repository| {
            boxed(async move { repo.get_subscription(a).await })
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.notification_index, 2);
    // bumps are not writes from the fencing token's point of view
    assert_eq!(after.version, version_before);
}
