//! Creating an operational intent without a subscription synthesizes an
//! implicit subscription covering the intent, and deleting the last
//! intent referencing it removes it in the same transaction.

use chrono::{TimeDelta, Utc};
use dss_core::operational_intent::{NewSubscriptionParams, PutIntentParams};
use dss_core::Service;
use dss_geo::{CoverConfig, Footprint, GeoPolygon, LatLng};
use dss_models::{DssError, FootprintSource, IntentState, Owner, Volume4D};
use dss_store::MemStore;
use uuid::Uuid;

fn service() -> Service<MemStore> {
    Service::new(MemStore::default(), CoverConfig::default())
}

fn box_extent(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64) -> Volume4D {
    let now = Utc::now();
    Volume4D {
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(1)),
        altitude_lo: Some(100.0),
        altitude_hi: Some(200.0),
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

fn put_params(extent: Volume4D) -> PutIntentParams {
    PutIntentParams {
        extents: vec![extent],
        key: vec![],
        state: IntentState::Accepted,
        base_url: "https://uss1.example.com/scd".to_string(),
        subscription_id: None,
        new_subscription: Some(NewSubscriptionParams {
            base_url: "https://uss1.example.com/scd".to_string(),
            notify_for_constraints: false,
        }),
    }
}

#[tokio::test]
async fn implicit_subscription_covers_the_intent() {
    let svc = service();
    let owner = Owner::from("uss1");
    let id = Uuid::new_v4();

    let extent = box_extent(37.00, -122.00, 37.03, -121.97);
    let change = svc
        .put_operational_intent(owner.clone(), id, None, put_params(extent))
        .await
        .expect("create must succeed");

    // Fresh OVN: base64(sha256) is 44 chars, valid per the 16–128 rule.
    assert_eq!(change.intent.ovn.as_str().len(), 44);
    assert!(change.intent.ovn.is_valid());
    assert_eq!(change.intent.version, 1);

    // The implicit subscription exists, is implicit, and covers the
    // intent's cells, time window and altitude band.
    let sub = svc
        .get_subscription(change.intent.subscription_id)
        .await
        .expect("implicit subscription must exist");
    assert!(sub.implicit);
    assert_eq!(sub.owner, owner);
    assert!(sub.cells.contains(&change.intent.cells));
    assert!(sub.notify_for_operations);
    assert!(sub.starts_at <= change.intent.starts_at);
    assert!(sub.ends_at >= change.intent.ends_at);
}

#[tokio::test]
async fn deleting_the_last_intent_collects_the_implicit_subscription() {
    let svc = service();
    let owner = Owner::from("uss1");
    let id = Uuid::new_v4();

    let change = svc
        .put_operational_intent(
            owner.clone(),
            id,
            None,
            put_params(box_extent(37.00, -122.00, 37.03, -121.97)),
        )
        .await
        .unwrap();
    let sub_id = change.intent.subscription_id;

    svc.delete_operational_intent(owner, id, change.intent.ovn.clone())
        .await
        .expect("delete must succeed");

    let err = svc.get_subscription(sub_id).await.unwrap_err();
    assert!(
        matches!(err, DssError::NotFound(_)),
        "implicit subscription must be garbage-collected, got {err:?}"
    );
}

#[tokio::test]
async fn implicit_subscription_survives_while_other_intents_reference_it() {
    let svc = service();
    let owner = Owner::from("uss1");

    let first = Uuid::new_v4();
    let change = svc
        .put_operational_intent(
            owner.clone(),
            first,
            None,
            put_params(box_extent(37.00, -122.00, 37.03, -121.97)),
        )
        .await
        .unwrap();
    let sub_id = change.intent.subscription_id;

    // Second intent points at the same subscription (same owner, covered
    // extent; the implicit subscription widens as needed).
    let second = Uuid::new_v4();
    let mut params = put_params(box_extent(37.00, -122.00, 37.03, -121.97));
    params.subscription_id = Some(sub_id);
    params.key = vec![change.intent.ovn.clone()];
    let change2 = svc
        .put_operational_intent(owner.clone(), second, None, params)
        .await
        .unwrap();
    assert_eq!(change2.intent.subscription_id, sub_id);

    // Deleting the first intent must keep the subscription alive.
    svc.delete_operational_intent(owner.clone(), first, change.intent.ovn.clone())
        .await
        .unwrap();
    assert!(svc.get_subscription(sub_id).await.is_ok());

    // Deleting the second (last) one collects it.
    svc.delete_operational_intent(owner, second, change2.intent.ovn.clone())
        .await
        .unwrap();
    assert!(svc.get_subscription(sub_id).await.is_err());
}
