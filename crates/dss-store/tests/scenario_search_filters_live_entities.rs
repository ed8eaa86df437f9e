//! 4-D search returns only entities that actually overlap the query
//! volume and are still live (`ends_at ≥ now`).

use chrono::{TimeDelta, Utc};
use dss_geo::{CellId, CellUnion, LatLng};
use dss_models::{IntentState, OperationalIntent, Owner, Ovn, Volume4D};
use dss_store::{boxed, MemStore, Repository, Store};
use uuid::Uuid;

fn cells_at(lat: f64, lng: f64) -> CellUnion {
    CellUnion::new(vec![CellId::from_lat_lng_at_level(LatLng::new(lat, lng), 13)])
}

fn intent(lat: f64, lng: f64, hours_from_now: i64, alt: (f64, f64)) -> OperationalIntent {
    let now = Utc::now();
    OperationalIntent {
        id: Uuid::new_v4(),
        owner: Owner::from("uss1"),
        url: "https://uss1.example.com/scd".to_string(),
        cells: cells_at(lat, lng),
        starts_at: Some(now + TimeDelta::hours(hours_from_now)),
        ends_at: Some(now + TimeDelta::hours(hours_from_now + 1)),
        altitude_lower: Some(alt.0),
        altitude_upper: Some(alt.1),
        state: IntentState::Accepted,
        ovn: Ovn::empty(),
        version: 1,
        subscription_id: Uuid::new_v4(),
        writer: None,
        updated_at: None,
    }
}

#[tokio::test]
async fn search_honours_cells_time_and_altitude() {
    let store = MemStore::default();

    let here_now = intent(37.0, -122.0, 0, (100.0, 200.0));
    let here_later = intent(37.0, -122.0, 6, (100.0, 200.0));
    let elsewhere = intent(45.0, 7.0, 0, (100.0, 200.0));
    let here_high = intent(37.0, -122.0, 0, (5000.0, 6000.0));

    for op in [
        here_now.clone(),
        here_later.clone(),
        elsewhere.clone(),
        here_high.clone(),
    ] {
        store
            .transact(|repo: &mut dyn Repository| {
                let op = op.clone();
                boxed(async move { repo.upsert_operation(op).await })
            })
            .await
            .unwrap();
    }

    // Query: here, the next two hours, 0–1000 m.
    let now = Utc::now();
    let vol = Volume4D::from_cells(
        cells_at(37.0, -122.0),
        Some(now),
        Some(now + TimeDelta::hours(2)),
        Some(0.0),
        Some(1000.0),
    );

    let found = store
        .transact(|repo: &mut dyn Repository| {
            let vol = vol.clone();
            boxed(async move { repo.search_operations(&vol).await })
        })
        .await
        .unwrap();

    let ids: Vec<_> = found.iter().map(|o| o.id).collect();
    assert!(ids.contains(&here_now.id), "overlapping intent is returned");
    assert!(!ids.contains(&here_later.id), "starts after the window");
    assert!(!ids.contains(&elsewhere.id), "different cells");
    assert!(!ids.contains(&here_high.id), "different altitude band");
}

#[tokio::test]
async fn expired_entities_never_surface() {
    let store = MemStore::default();

    // Ends an hour ago. The repo accepts the row (validation is the
    // service's job) but search must never return it.
    let mut expired = intent(37.0, -122.0, 0, (100.0, 200.0));
    expired.starts_at = Some(Utc::now() - TimeDelta::hours(2));
    expired.ends_at = Some(Utc::now() - TimeDelta::hours(1));

    store
        .transact(|repo: &mut dyn Repository| {
            let op = expired.clone();
            boxed(async move { repo.upsert_operation(op).await })
        })
        .await
        .unwrap();

    let vol = Volume4D::from_cells(cells_at(37.0, -122.0), None, None, None, None);
    let found = store
        .transact(|repo: &mut dyn Repository| {
            let vol = vol.clone();
            boxed(async move { repo.search_operations(&vol).await })
        })
        .await
        .unwrap();
    assert!(found.is_empty());
}
