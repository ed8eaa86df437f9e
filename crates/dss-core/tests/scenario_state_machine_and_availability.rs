//! Operational intent lifecycle: the state machine and the availability
//! gate on transitions into the strategic states.

use chrono::{TimeDelta, Utc};
use dss_core::operational_intent::{NewSubscriptionParams, PutIntentParams};
use dss_core::Service;
use dss_geo::{CoverConfig, Footprint, GeoPolygon, LatLng};
use dss_models::{
    AvailabilityStatus, DssError, FootprintSource, IntentState, Owner, Volume4D,
};
use dss_store::MemStore;
use uuid::Uuid;

fn service() -> Service<MemStore> {
    Service::new(MemStore::default(), CoverConfig::default())
}

fn extent() -> Volume4D {
    let now = Utc::now();
    Volume4D {
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(1)),
        altitude_lo: Some(50.0),
        altitude_hi: Some(120.0),
        footprint: Some(FootprintSource::Geometry(Footprint::Polygon(GeoPolygon {
            vertices: vec![
                LatLng::new(37.00, -122.00),
                LatLng::new(37.00, -121.98),
                LatLng::new(37.02, -121.98),
                LatLng::new(37.02, -122.00),
            ],
        }))),
    }
}

fn params(state: IntentState) -> PutIntentParams {
    PutIntentParams {
        extents: vec![extent()],
        key: vec![],
        state,
        base_url: "https://uss-a.example.com/scd".to_string(),
        subscription_id: None,
        new_subscription: Some(NewSubscriptionParams {
            base_url: "https://uss-a.example.com/scd".to_string(),
            notify_for_constraints: false,
        }),
    }
}

#[tokio::test]
async fn create_must_start_accepted() {
    let svc = service();
    let owner = Owner::from("uss-a");

    for bad in [
        IntentState::Activated,
        IntentState::Nonconforming,
        IntentState::Contingent,
    ] {
        let err = svc
            .put_operational_intent(owner.clone(), Uuid::new_v4(), None, params(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, DssError::BadRequest(_)), "{bad:?}: {err:?}");
    }

    svc.put_operational_intent(owner, Uuid::new_v4(), None, params(IntentState::Accepted))
        .await
        .expect("Accepted is the only valid creation state");
}

#[tokio::test]
async fn activation_round_trip_and_sticky_degradation() {
    let svc = service();
    let owner = Owner::from("uss-a");
    let id = Uuid::new_v4();

    let v1 = svc
        .put_operational_intent(owner.clone(), id, None, params(IntentState::Accepted))
        .await
        .unwrap();

    let mut p = params(IntentState::Activated);
    p.subscription_id = Some(v1.intent.subscription_id);
    let v2 = svc
        .put_operational_intent(owner.clone(), id, Some(v1.intent.ovn.clone()), p)
        .await
        .expect("Accepted -> Activated is legal");

    let mut p = params(IntentState::Contingent);
    p.subscription_id = Some(v2.intent.subscription_id);
    let v3 = svc
        .put_operational_intent(owner.clone(), id, Some(v2.intent.ovn.clone()), p)
        .await
        .expect("Activated -> Contingent is legal");

    // A degraded intent only leaves its state by deletion.
    let mut p = params(IntentState::Activated);
    p.subscription_id = Some(v3.intent.subscription_id);
    let err = svc
        .put_operational_intent(owner, id, Some(v3.intent.ovn.clone()), p)
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn down_uss_cannot_enter_strategic_states() {
    let svc = service();
    let owner = Owner::from("uss-a");

    // The arbitrator declares uss-a Down.
    svc.set_availability("uss-a".to_string(), AvailabilityStatus::Down, String::new())
        .await
        .unwrap();

    let err = svc
        .put_operational_intent(
            owner.clone(),
            Uuid::new_v4(),
            None,
            params(IntentState::Accepted),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::PreconditionFailed(_)), "{err:?}");

    // Back to Normal: creation works again.
    let current = svc.get_availability("uss-a".to_string()).await.unwrap();
    svc.set_availability(
        "uss-a".to_string(),
        AvailabilityStatus::Normal,
        current.version.map(|v| v.to_string()).unwrap_or_default(),
    )
    .await
    .unwrap();

    svc.put_operational_intent(owner, Uuid::new_v4(), None, params(IntentState::Accepted))
        .await
        .expect("a Normal USS can create intents");
}

#[tokio::test]
async fn availability_writes_are_version_fenced() {
    let svc = service();

    svc.set_availability("uss-a".to_string(), AvailabilityStatus::Normal, String::new())
        .await
        .unwrap();

    // Writing again with the empty (pre-creation) version must fail.
    let err = svc
        .set_availability("uss-a".to_string(), AvailabilityStatus::Down, String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::VersionMismatch(_)), "{err:?}");

    let current = svc.get_availability("uss-a".to_string()).await.unwrap();
    assert_eq!(current.status, AvailabilityStatus::Normal);
    svc.set_availability(
        "uss-a".to_string(),
        AvailabilityStatus::Down,
        current.version.map(|v| v.to_string()).unwrap_or_default(),
    )
    .await
    .expect("write with the current version succeeds");
}
