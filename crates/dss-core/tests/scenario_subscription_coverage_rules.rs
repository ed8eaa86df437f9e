//! Subscription coverage invariant: every operational intent is contained
//! by its subscription. Implicit subscriptions grow to keep the invariant;
//! explicit ones must already satisfy it; a subscription propping up a
//! live intent cannot be deleted or shrunk out from under it.

use chrono::{TimeDelta, Utc};
use dss_core::operational_intent::{NewSubscriptionParams, PutIntentParams};
use dss_core::subscription::PutScdSubscriptionParams;
use dss_core::Service;
use dss_geo::{CoverConfig, Footprint, GeoPolygon, LatLng};
use dss_models::{DssError, FootprintSource, IntentState, Owner, Volume4D};
use dss_store::MemStore;
use uuid::Uuid;

fn service() -> Service<MemStore> {
    Service::new(MemStore::default(), CoverConfig::default())
}

fn box_extent(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64, hours: i64) -> Volume4D {
    let now = Utc::now();
    Volume4D {
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(hours)),
        altitude_lo: Some(0.0),
        altitude_hi: Some(300.0),
        footprint: Some(FootprintSource::Geometry(Footprint::Polygon(GeoPolygon {
            vertices: vec![
                LatLng::new(lat_lo, lng_lo),
                LatLng::new(lat_lo, lng_hi),
                LatLng::new(lat_hi, lng_hi),
                LatLng::new(lat_hi, lng_lo),
            ],
        }))),
    }
}

fn intent_params(extent: Volume4D, sub: Option<Uuid>) -> PutIntentParams {
    PutIntentParams {
        extents: vec![extent],
        key: vec![],
        state: IntentState::Accepted,
        base_url: "https://uss-a.example.com/scd".to_string(),
        subscription_id: sub,
        new_subscription: Some(NewSubscriptionParams {
            base_url: "https://uss-a.example.com/scd".to_string(),
            notify_for_constraints: false,
        }),
    }
}

#[tokio::test]
async fn explicit_subscription_must_already_cover() {
    let svc = service();
    let owner = Owner::from("uss-a");

    // Explicit subscription over a small box, two hours.
    let sub_id = Uuid::new_v4();
    svc.put_scd_subscription(
        owner.clone(),
        sub_id,
        None,
        PutScdSubscriptionParams {
            extents: box_extent(37.00, -122.00, 37.02, -121.98, 2),
            base_url: "https://uss-a.example.com/scd".to_string(),
            notify_for_operations: true,
            notify_for_constraints: false,
        },
    )
    .await
    .unwrap();

    // An intent escaping the box is refused outright.
    let err = svc
        .put_operational_intent(
            owner.clone(),
            Uuid::new_v4(),
            None,
            intent_params(box_extent(37.00, -122.00, 37.05, -121.95, 1), Some(sub_id)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::BadRequest(_)), "{err:?}");

    // An intent inside the box is fine.
    svc.put_operational_intent(
        owner,
        Uuid::new_v4(),
        None,
        intent_params(box_extent(37.005, -121.995, 37.015, -121.985, 1), Some(sub_id)),
    )
    .await
    .expect("covered intent must be accepted");
}

#[tokio::test]
async fn implicit_subscription_widens_to_keep_covering() {
    let svc = service();
    let owner = Owner::from("uss-a");
    let id = Uuid::new_v4();

    let created = svc
        .put_operational_intent(
            owner.clone(),
            id,
            None,
            intent_params(box_extent(37.00, -122.00, 37.02, -121.98, 1), None),
        )
        .await
        .unwrap();
    let sub_id = created.intent.subscription_id;
    let before = svc.get_subscription(sub_id).await.unwrap();

    // Rewrite the intent over a larger box and a longer window, keeping
    // the implicit subscription.
    let updated = svc
        .put_operational_intent(
            owner,
            id,
            Some(created.intent.ovn.clone()),
            intent_params(box_extent(37.00, -122.00, 37.04, -121.96, 3), Some(sub_id)),
        )
        .await
        .expect("implicit subscription must widen");

    let after = svc.get_subscription(sub_id).await.unwrap();
    assert!(after.cells.contains(&updated.intent.cells));
    assert!(after.cells.len() > before.cells.len());
    assert!(after.ends_at >= updated.intent.ends_at);
}

#[tokio::test]
async fn subscription_backing_an_intent_cannot_be_deleted_or_shrunk() {
    let svc = service();
    let owner = Owner::from("uss-a");

    let sub_id = Uuid::new_v4();
    let sub = svc
        .put_scd_subscription(
            owner.clone(),
            sub_id,
            None,
            PutScdSubscriptionParams {
                extents: box_extent(37.00, -122.00, 37.05, -121.95, 4),
                base_url: "https://uss-a.example.com/scd".to_string(),
                notify_for_operations: true,
                notify_for_constraints: false,
            },
        )
        .await
        .unwrap();

    let intent_id = Uuid::new_v4();
    let change = svc
        .put_operational_intent(
            owner.clone(),
            intent_id,
            None,
            intent_params(box_extent(37.01, -121.99, 37.02, -121.98, 1), Some(sub_id)),
        )
        .await
        .unwrap();

    // Delete is blocked while the intent references it.
    let err = svc
        .delete_subscription(owner.clone(), sub_id, sub.version.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::BadRequest(_)), "{err:?}");

    // So is shrinking it below the intent's extent.
    let err = svc
        .put_scd_subscription(
            owner.clone(),
            sub_id,
            sub.version,
            PutScdSubscriptionParams {
                extents: box_extent(45.00, 7.00, 45.02, 7.02, 4),
                base_url: "https://uss-a.example.com/scd".to_string(),
                notify_for_operations: true,
                notify_for_constraints: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::BadRequest(_)), "{err:?}");

    // After the intent goes away the subscription is free again.
    svc.delete_operational_intent(owner.clone(), intent_id, change.intent.ovn.clone())
        .await
        .unwrap();
    let sub = svc.get_subscription(sub_id).await.unwrap();
    svc.delete_subscription(owner, sub_id, sub.version.unwrap())
        .await
        .expect("unreferenced subscription deletes cleanly");
}

#[tokio::test]
async fn foreign_subscription_cannot_back_an_intent() {
    let svc = service();

    let sub_id = Uuid::new_v4();
    svc.put_scd_subscription(
        Owner::from("uss-b"),
        sub_id,
        None,
        PutScdSubscriptionParams {
            extents: box_extent(37.00, -122.00, 37.05, -121.95, 4),
            base_url: "https://uss-b.example.com/scd".to_string(),
            notify_for_operations: true,
            notify_for_constraints: false,
        },
    )
    .await
    .unwrap();

    let err = svc
        .put_operational_intent(
            Owner::from("uss-a"),
            Uuid::new_v4(),
            None,
            intent_params(box_extent(37.01, -121.99, 37.02, -121.98, 1), Some(sub_id)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::PermissionDenied(_)), "{err:?}");
}
