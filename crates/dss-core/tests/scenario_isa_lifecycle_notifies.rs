//! Remote-ID flow: ISA create/update/delete each notify every overlapping
//! live subscription exactly once, and a subscription write returns the
//! ISAs already in its area.

use chrono::{TimeDelta, Utc};
use dss_core::isa::PutIsaParams;
use dss_core::subscription::PutRidSubscriptionParams;
use dss_core::Service;
use dss_geo::{CoverConfig, Footprint, GeoPolygon, LatLng};
use dss_models::{DssError, FootprintSource, Owner, Volume4D};
use dss_store::MemStore;
use uuid::Uuid;

fn service() -> Service<MemStore> {
    Service::new(MemStore::default(), CoverConfig::default())
}

fn rid_extent(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64) -> Volume4D {
    let now = Utc::now();
    Volume4D {
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(4)),
        altitude_lo: None,
        altitude_hi: None,
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
async fn isa_lifecycle_bumps_watcher_three_times() {
    let svc = service();
    let watcher = Owner::from("uss-a");
    let publisher = Owner::from("uss-b");

    let sub_id = Uuid::new_v4();
    svc.put_rid_subscription(
        watcher,
        sub_id,
        None,
        PutRidSubscriptionParams {
            extents: rid_extent(37.00, -122.00, 37.05, -121.95),
            url: "https://uss-a.example.com/rid".to_string(),
        },
    )
    .await
    .unwrap();

    // Create.
    let isa_id = Uuid::new_v4();
    let created = svc
        .put_isa(
            publisher.clone(),
            isa_id,
            None,
            PutIsaParams {
                extents: rid_extent(37.01, -121.99, 37.02, -121.98),
                flights_url: "https://uss-b.example.com/flights".to_string(),
            },
        )
        .await
        .unwrap();
    let to_watcher = created
        .subscribers
        .iter()
        .find(|s| s.url == "https://uss-a.example.com/rid")
        .expect("watcher must be notified of the create");
    assert!(to_watcher.subscriptions.contains(&(sub_id, 1)));

    // Update.
    let updated = svc
        .put_isa(
            publisher.clone(),
            isa_id,
            created.isa.version,
            PutIsaParams {
                extents: rid_extent(37.01, -121.99, 37.03, -121.97),
                flights_url: "https://uss-b.example.com/flights".to_string(),
            },
        )
        .await
        .unwrap();
    assert_ne!(updated.isa.version, created.isa.version);
    assert_eq!(svc.get_subscription(sub_id).await.unwrap().notification_index, 2);

    // Delete.
    svc.delete_isa(publisher, isa_id, updated.isa.version.unwrap())
        .await
        .unwrap();
    assert_eq!(svc.get_subscription(sub_id).await.unwrap().notification_index, 3);

    let err = svc.get_isa(isa_id).await.unwrap_err();
    assert!(matches!(err, DssError::NotFound(_)));
}

#[tokio::test]
async fn subscription_write_returns_isas_already_in_area() {
    let svc = service();
    let publisher = Owner::from("uss-b");

    let isa_id = Uuid::new_v4();
    svc.put_isa(
        publisher,
        isa_id,
        None,
        PutIsaParams {
            extents: rid_extent(37.01, -121.99, 37.02, -121.98),
            flights_url: "https://uss-b.example.com/flights".to_string(),
        },
    )
    .await
    .unwrap();

    let change = svc
        .put_rid_subscription(
            Owner::from("uss-a"),
            Uuid::new_v4(),
            None,
            PutRidSubscriptionParams {
                extents: rid_extent(37.00, -122.00, 37.05, -121.95),
                url: "https://uss-a.example.com/rid".to_string(),
            },
        )
        .await
        .unwrap();

    assert!(change.service_areas.iter().any(|isa| isa.id == isa_id));
}

#[tokio::test]
async fn isa_search_finds_live_areas_in_polygon() {
    let svc = service();
    let publisher = Owner::from("uss-b");

    let isa_id = Uuid::new_v4();
    svc.put_isa(
        publisher,
        isa_id,
        None,
        PutIsaParams {
            extents: rid_extent(37.01, -121.99, 37.02, -121.98),
            flights_url: "https://uss-b.example.com/flights".to_string(),
        },
    )
    .await
    .unwrap();

    let hit = svc
        .search_isas(
            GeoPolygon {
                vertices: vec![
                    LatLng::new(37.00, -122.00),
                    LatLng::new(37.00, -121.95),
                    LatLng::new(37.05, -121.95),
                    LatLng::new(37.05, -122.00),
                ],
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert!(hit.iter().any(|isa| isa.id == isa_id));

    let miss = svc
        .search_isas(
            GeoPolygon {
                vertices: vec![
                    LatLng::new(45.00, 7.00),
                    LatLng::new(45.00, 7.05),
                    LatLng::new(45.05, 7.05),
                    LatLng::new(45.05, 7.00),
                ],
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert!(miss.iter().all(|isa| isa.id != isa_id));
}
