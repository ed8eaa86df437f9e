//! Subscription handlers, for both wire surfaces.
//!
//! Remote-ID subscriptions are notified of every ISA change; strategic
//! subscriptions declare interest in operational intents and/or
//! constraints. Both share one table, one slot cap and one delete
//! protection: a subscription still covering a live operational intent
//! cannot be removed out from under it.

use dss_geo::GeoPolygon;
use dss_models::{
    DssError, IdentificationServiceArea, Owner, Subscription, Version, Volume4D,
};
use dss_store::{boxed, Repository, Store};
use tracing::info;
use uuid::Uuid;

use crate::{Service, MAX_SUBSCRIPTIONS_PER_CELL};

/// Result of a RID subscription write: the row plus the ISAs already in
/// its area (so the subscriber can catch up without polling).
#[derive(Debug, Clone)]
pub struct RidSubscriptionChange {
    pub subscription: Subscription,
    pub service_areas: Vec<IdentificationServiceArea>,
}

#[derive(Debug, Clone)]
pub struct PutRidSubscriptionParams {
    pub extents: Volume4D,
    /// `callbacks.identification_service_area_url`.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PutScdSubscriptionParams {
    pub extents: Volume4D,
    pub base_url: String,
    pub notify_for_operations: bool,
    pub notify_for_constraints: bool,
}

impl<S: Store> Service<S> {
    pub async fn get_subscription(&self, id: Uuid) -> Result<Subscription, DssError> {
        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    repo.get_subscription(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))
                })
            })
            .await
    }

    /// RID area search: the caller's own subscriptions touching the area.
    pub async fn search_subscriptions(
        &self,
        owner: Owner,
        area: GeoPolygon,
    ) -> Result<Vec<Subscription>, DssError> {
        let cover = self.cover();
        let cells = dss_geo::Footprint::Polygon(area).covering(&cover)?;

        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move { repo.search_subscriptions_by_owner(&cells, &owner).await })
            })
            .await
    }

    /// SCD volume query: the caller's subscriptions overlapping the volume.
    pub async fn query_subscriptions(
        &self,
        owner: Owner,
        vol: Volume4D,
    ) -> Result<Vec<Subscription>, DssError> {
        let cover = self.cover();
        let cells = vol.covering(&cover)?;
        let vol = Volume4D::from_cells(cells, vol.starts_at, vol.ends_at, vol.altitude_lo, vol.altitude_hi);

        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    let subs = repo.search_subscriptions(&vol).await?;
                    Ok(subs.into_iter().filter(|s| s.owner == owner).collect())
                })
            })
            .await
    }

    /// PUT (RID surface).
    pub async fn put_rid_subscription(
        &self,
        owner: Owner,
        id: Uuid,
        version: Option<Version>,
        params: PutRidSubscriptionParams,
    ) -> Result<RidSubscriptionChange, DssError> {
        if params.url.is_empty() {
            return Err(DssError::BadRequest(
                "missing required callbacks.identification_service_area_url".to_string(),
            ));
        }

        let cover = self.cover();
        let cells = params.extents.covering(&cover)?;
        let extents = params.extents.clone();
        let url = params.url.clone();

        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let cells = cells.clone();
                let extents = extents.clone();
                let url = url.clone();
                boxed(async move {
                    let now = repo.now().await?;
                    let old =
                        check_subscription_preconditions(repo, id, &owner, &version).await?;

                    check_slot_cap(repo, &owner, &cells, old.is_some()).await?;

                    let mut sub = Subscription {
                        id,
                        owner,
                        url,
                        notification_index: 0,
                        notify_for_operations: false,
                        notify_for_constraints: false,
                        implicit: false,
                        cells,
                        starts_at: extents.starts_at,
                        ends_at: extents.ends_at,
                        altitude_lo: extents.altitude_lo,
                        altitude_hi: extents.altitude_hi,
                        writer: None,
                        version,
                    };
                    sub.adjust_time_range(now, old.as_ref())?;

                    let sub = repo.upsert_subscription(sub).await?;

                    // Hand back the ISAs already inside the area.
                    let service_areas = repo.search_isas(&sub.extent()).await?;

                    Ok(RidSubscriptionChange {
                        subscription: sub,
                        service_areas,
                    })
                })
            })
            .await?;

        info!(subscription_id = %id, "subscription upserted");
        Ok(change)
    }

    /// PUT (SCD surface).
    pub async fn put_scd_subscription(
        &self,
        owner: Owner,
        id: Uuid,
        version: Option<Version>,
        params: PutScdSubscriptionParams,
    ) -> Result<Subscription, DssError> {
        dss_models::validate_uss_base_url(&params.base_url)?;

        let cover = self.cover();
        let cells = params.extents.covering(&cover)?;
        let params = params.clone();

        let sub = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let cells = cells.clone();
                let params = params.clone();
                boxed(async move {
                    let now = repo.now().await?;
                    let old =
                        check_subscription_preconditions(repo, id, &owner, &version).await?;

                    check_slot_cap(repo, &owner, &cells, old.is_some()).await?;

                    let mut sub = Subscription {
                        id,
                        owner,
                        url: params.base_url,
                        notification_index: 0,
                        notify_for_operations: params.notify_for_operations,
                        notify_for_constraints: params.notify_for_constraints,
                        // an explicitly managed subscription stays explicit;
                        // implicit ones keep following their intents
                        implicit: old.as_ref().map_or(false, |o| o.implicit),
                        cells: cells.clone(),
                        starts_at: params.extents.starts_at,
                        ends_at: params.extents.ends_at,
                        altitude_lo: params.extents.altitude_lo,
                        altitude_hi: params.extents.altitude_hi,
                        writer: None,
                        version,
                    };
                    sub.adjust_time_range(now, old.as_ref())?;

                    // Shrinking must not orphan a covered intent.
                    let dependents = repo.operations_by_subscription(id).await?;
                    for op in &dependents {
                        if !sub.contains_extent(&op.extent(), &op.cells) {
                            return Err(DssError::BadRequest(format!(
                                "subscription no longer covers operational intent {}",
                                op.id
                            )));
                        }
                    }

                    repo.upsert_subscription(sub).await
                })
            })
            .await?;

        info!(subscription_id = %id, "subscription upserted");
        Ok(sub)
    }

    /// DELETE (both surfaces).
    pub async fn delete_subscription(
        &self,
        owner: Owner,
        id: Uuid,
        version: Version,
    ) -> Result<Subscription, DssError> {
        let deleted = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                boxed(async move {
                    let old = repo
                        .get_subscription(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))?;
                    if old.owner != owner {
                        return Err(DssError::PermissionDenied(format!(
                            "subscription is owned by {}",
                            old.owner
                        )));
                    }
                    if old.version != Some(version) {
                        return Err(DssError::VersionMismatch("old version".to_string()));
                    }

                    let dependents = repo.operations_by_subscription(id).await?;
                    if let Some(op) = dependents.first() {
                        return Err(DssError::BadRequest(format!(
                            "subscription still covers operational intent {}; delete or re-point it first",
                            op.id
                        )));
                    }

                    repo.delete_subscription(id, version).await
                })
            })
            .await?;

        info!(subscription_id = %id, "subscription deleted");
        Ok(deleted)
    }
}

/// Shared precondition block: fetch the old row and run the not-found /
/// already-exists / owner / version ladder.
pub(crate) async fn check_subscription_preconditions(
    repo: &mut dyn Repository,
    id: Uuid,
    owner: &Owner,
    version: &Option<Version>,
) -> Result<Option<Subscription>, DssError> {
    let old = repo.get_subscription(id).await?;
    match (&old, version) {
        (None, Some(_)) => return Err(DssError::NotFound(id.to_string())),
        (Some(_), None) => return Err(DssError::AlreadyExists(id.to_string())),
        (Some(stored), Some(v)) => {
            if stored.owner != *owner {
                return Err(DssError::PermissionDenied(format!(
                    "subscription is owned by {}",
                    stored.owner
                )));
            }
            if stored.version != Some(*v) {
                return Err(DssError::VersionMismatch("old version".to_string()));
            }
        }
        (None, None) => {}
    }
    Ok(old)
}

/// The DSS0030 slot check: at most 10 live subscriptions per owner in any
/// single cell of the requested area.
pub(crate) async fn check_slot_cap(
    repo: &mut dyn Repository,
    owner: &Owner,
    cells: &dss_geo::CellUnion,
    is_update: bool,
) -> Result<(), DssError> {
    let count = repo.max_subscriptions_per_cell(owner, cells).await?;
    if count >= MAX_SUBSCRIPTIONS_PER_CELL {
        let mut msg = "too many existing subscriptions in this area already".to_string();
        if is_update {
            msg.push_str(", rejecting update request");
        }
        return Err(DssError::Exhausted(msg));
    }
    Ok(())
}
