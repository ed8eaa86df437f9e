//! Constraint references: OVN-fenced writes, constraint-interested
//! notifications, and participation in intent fencing keys.

use chrono::{TimeDelta, Utc};
use dss_core::constraint::PutConstraintParams;
use dss_core::operational_intent::{NewSubscriptionParams, PutIntentParams};
use dss_core::subscription::PutScdSubscriptionParams;
use dss_core::Service;
use dss_geo::{CoverConfig, Footprint, GeoPolygon, LatLng};
use dss_models::{DssError, EntityKind, FootprintSource, IntentState, Owner, Volume4D};
use dss_store::MemStore;
use uuid::Uuid;

fn service() -> Service<MemStore> {
    Service::new(MemStore::default(), CoverConfig::default())
}

fn box_extent(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64) -> Volume4D {
    let now = Utc::now();
    Volume4D {
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(2)),
        altitude_lo: Some(0.0),
        altitude_hi: Some(500.0),
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

#[tokio::test]
async fn constraint_lifecycle_with_ovn_fencing() {
    let svc = service();
    let authority = Owner::from("uss-authority");
    let id = Uuid::new_v4();

    let created = svc
        .put_constraint(
            authority.clone(),
            id,
            None,
            PutConstraintParams {
                extents: vec![box_extent(37.00, -122.00, 37.03, -121.97)],
                base_url: "https://authority.example.com/constraints".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(created.constraint.version, 1);
    assert!(created.constraint.ovn.is_valid());

    // Update requires the current OVN.
    let err = svc
        .put_constraint(
            authority.clone(),
            id,
            Some(dss_models::Ovn::new("0123456789abcdef0123456789abcdef".to_string())),
            PutConstraintParams {
                extents: vec![box_extent(37.00, -122.00, 37.03, -121.97)],
                base_url: "https://authority.example.com/constraints".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::VersionMismatch(_)), "{err:?}");

    let updated = svc
        .put_constraint(
            authority.clone(),
            id,
            Some(created.constraint.ovn.clone()),
            PutConstraintParams {
                extents: vec![box_extent(37.00, -122.00, 37.04, -121.96)],
                base_url: "https://authority.example.com/constraints".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.constraint.version, 2);
    assert_ne!(updated.constraint.ovn, created.constraint.ovn);

    svc.delete_constraint(authority, id, updated.constraint.ovn.clone())
        .await
        .unwrap();
    let err = svc
        .get_constraint(Owner::from("anyone"), id)
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::NotFound(_)));
}

#[tokio::test]
async fn constraints_notify_only_constraint_watchers() {
    let svc = service();

    let ops_watcher = Uuid::new_v4();
    let constraint_watcher = Uuid::new_v4();
    for (id, ops, constraints) in [
        (ops_watcher, true, false),
        (constraint_watcher, false, true),
    ] {
        svc.put_scd_subscription(
            Owner::from("uss-w"),
            id,
            None,
            PutScdSubscriptionParams {
                extents: box_extent(37.00, -122.00, 37.05, -121.95),
                base_url: "https://uss-w.example.com/scd".to_string(),
                notify_for_operations: ops,
                notify_for_constraints: constraints,
            },
        )
        .await
        .unwrap();
    }

    svc.put_constraint(
        Owner::from("uss-authority"),
        Uuid::new_v4(),
        None,
        PutConstraintParams {
            extents: vec![box_extent(37.01, -121.99, 37.02, -121.98)],
            base_url: "https://authority.example.com/constraints".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(
        svc.get_subscription(constraint_watcher)
            .await
            .unwrap()
            .notification_index,
        1
    );
    assert_eq!(
        svc.get_subscription(ops_watcher)
            .await
            .unwrap()
            .notification_index,
        0
    );
}

#[tokio::test]
async fn intents_must_key_overlapping_constraints() {
    let svc = service();

    let constraint = svc
        .put_constraint(
            Owner::from("uss-authority"),
            Uuid::new_v4(),
            None,
            PutConstraintParams {
                extents: vec![box_extent(37.00, -122.00, 37.03, -121.97)],
                base_url: "https://authority.example.com/constraints".to_string(),
            },
        )
        .await
        .unwrap();

    let params = PutIntentParams {
        extents: vec![box_extent(37.01, -121.99, 37.02, -121.98)],
        key: vec![],
        state: IntentState::Accepted,
        base_url: "https://uss-a.example.com/scd".to_string(),
        subscription_id: None,
        new_subscription: Some(NewSubscriptionParams {
            base_url: "https://uss-a.example.com/scd".to_string(),
            notify_for_constraints: true,
        }),
    };

    let err = svc
        .put_operational_intent(Owner::from("uss-a"), Uuid::new_v4(), None, params.clone())
        .await
        .unwrap_err();
    let DssError::MissingOvns(missing) = err else {
        panic!("expected MissingOvns");
    };
    assert!(missing
        .iter()
        .any(|m| m.entity_id == constraint.constraint.id && m.kind == EntityKind::Constraint));

    let mut keyed = params;
    keyed.key = vec![constraint.constraint.ovn.clone()];
    svc.put_operational_intent(Owner::from("uss-a"), Uuid::new_v4(), None, keyed)
        .await
        .expect("constraint OVN in the key clears the check");
}
