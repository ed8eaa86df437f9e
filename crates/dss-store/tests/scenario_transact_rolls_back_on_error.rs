//! A transaction closure that fails leaves no trace: writes made before
//! the error are rolled back, and `interact` never commits at all.

use chrono::{TimeDelta, Utc};
use dss_geo::{CellId, CellUnion, LatLng};
use dss_models::{DssError, IdentificationServiceArea, Owner};
use dss_store::{boxed, MemStore, Repository, Store};
use uuid::Uuid;

fn fresh_isa(id: Uuid) -> IdentificationServiceArea {
    let now = Utc::now();
    IdentificationServiceArea {
        id,
        owner: Owner::from("uss1"),
        url: "https://uss1.example.com/rid".to_string(),
        cells: CellUnion::new(vec![CellId::from_lat_lng_at_level(
            LatLng::new(37.0, -122.0),
            13,
        )]),
        starts_at: Some(now),
        ends_at: Some(now + TimeDelta::hours(1)),
        writer: None,
        version: None,
    }
}

#[tokio::test]
async fn failed_transaction_leaves_no_partial_writes() {
    let store = MemStore::default();
    let id = Uuid::new_v4();

    let err = store
        .transact(|repo: &mut dyn Repository| {
            let isa = fresh_isa(id);
            boxed(async move {
                repo.upsert_isa(isa).await?;
                Err::<(), _>(DssError::BadRequest("synthetic failure".to_string()))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DssError::BadRequest(_)));

    let after = store
        .transact(|repo: &mut dyn Repository| boxed(async move { repo.get_isa(id).await }))
        .await
        .unwrap();
    assert!(after.is_none(), "rolled-back write must not be visible");
}

#[tokio::test]
async fn interact_discards_writes() {
    let store = MemStore::default();
    let id = Uuid::new_v4();

    store
        .interact(|repo: &mut dyn Repository| {
            let isa = fresh_isa(id);
            boxed(async move { repo.upsert_isa(isa).await })
        })
        .await
        .unwrap();

    let after = store
        .transact(|repo: &mut dyn Repository| boxed(async move { repo.get_isa(id).await }))
        .await
        .unwrap();
    assert!(after.is_none(), "interact is read-only");
}
