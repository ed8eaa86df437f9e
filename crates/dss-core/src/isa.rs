//! Identification service area handlers.

use chrono::{DateTime, Utc};
use dss_geo::{Footprint, GeoPolygon};
use dss_models::{
    DssError, FootprintSource, IdentificationServiceArea, Owner, Version, Volume4D,
};
use dss_store::{boxed, Repository, Store};
use tracing::info;
use uuid::Uuid;

use crate::{
    bump_overlapping_subscribers, subscribers_to_notify, EntityInterest, Service,
    SubscriberToNotify,
};

/// Result of an ISA mutation: the row plus who to notify.
#[derive(Debug, Clone)]
pub struct IsaChange {
    pub isa: IdentificationServiceArea,
    pub subscribers: Vec<SubscriberToNotify>,
}

#[derive(Debug, Clone)]
pub struct PutIsaParams {
    pub extents: Volume4D,
    pub flights_url: String,
}

impl<S: Store> Service<S> {
    /// GET /identification_service_areas (area search).
    pub async fn search_isas(
        &self,
        area: GeoPolygon,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<Vec<IdentificationServiceArea>, DssError> {
        let cover = self.cover();
        let cells = Footprint::Polygon(area).covering(&cover)?;
        let vol = Volume4D::from_cells(cells, earliest, latest, None, None);

        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move { repo.search_isas(&vol).await })
            })
            .await
    }

    pub async fn get_isa(&self, id: Uuid) -> Result<IdentificationServiceArea, DssError> {
        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    repo.get_isa(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))
                })
            })
            .await
    }

    /// PUT /identification_service_areas/{id}[/{version}].
    ///
    /// `version: None` creates; `Some` updates at exactly that version.
    pub async fn put_isa(
        &self,
        owner: Owner,
        id: Uuid,
        version: Option<Version>,
        params: PutIsaParams,
    ) -> Result<IsaChange, DssError> {
        if params.flights_url.is_empty() {
            return Err(DssError::BadRequest(
                "missing required flights_url".to_string(),
            ));
        }

        // Cover the footprint before opening the transaction; this is the
        // CPU-heavy part and can fail AreaTooLarge.
        let cover = self.cover();
        let cells = params.extents.covering(&cover)?;
        let extents = params.extents.clone();
        let flights_url = params.flights_url.clone();

        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let cells = cells.clone();
                let extents = extents.clone();
                let flights_url = flights_url.clone();
                boxed(async move {
                    let now = repo.now().await?;
                    let old = repo.get_isa(id).await?;

                    match (&old, &version) {
                        (None, Some(_)) => return Err(DssError::NotFound(id.to_string())),
                        (Some(_), None) => {
                            return Err(DssError::AlreadyExists(id.to_string()));
                        }
                        (Some(stored), Some(v)) => {
                            if stored.owner != owner {
                                return Err(DssError::PermissionDenied(format!(
                                    "ISA is owned by {}",
                                    stored.owner
                                )));
                            }
                            if stored.version != Some(*v) {
                                return Err(DssError::VersionMismatch(
                                    "old version".to_string(),
                                ));
                            }
                        }
                        (None, None) => {}
                    }

                    let mut isa = IdentificationServiceArea {
                        id,
                        owner,
                        url: flights_url,
                        cells,
                        starts_at: extents.starts_at,
                        ends_at: extents.ends_at,
                        writer: None,
                        version,
                    };
                    isa.adjust_time_range(now)?;

                    let isa = repo.upsert_isa(isa).await?;

                    // Subscribers overlapping the union of the pre- and
                    // post-image extents get exactly one bump.
                    let mut extent = isa.extent();
                    if let Some(old) = &old {
                        extent = union_extents(extent, old.extent());
                    }
                    let subs =
                        bump_overlapping_subscribers(repo, &extent, EntityInterest::Isa).await?;

                    Ok(IsaChange {
                        isa,
                        subscribers: subscribers_to_notify(&subs),
                    })
                })
            })
            .await?;

        info!(isa_id = %id, subscribers = change.subscribers.len(), "isa upserted");
        Ok(change)
    }

    pub async fn delete_isa(
        &self,
        owner: Owner,
        id: Uuid,
        version: Version,
    ) -> Result<IsaChange, DssError> {
        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                boxed(async move {
                    let old = repo
                        .get_isa(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))?;
                    if old.owner != owner {
                        return Err(DssError::PermissionDenied(format!(
                            "ISA is owned by {}",
                            old.owner
                        )));
                    }
                    if old.version != Some(version) {
                        return Err(DssError::VersionMismatch("old version".to_string()));
                    }

                    let deleted = repo.delete_isa(id, version).await?;
                    let subs = bump_overlapping_subscribers(
                        repo,
                        &deleted.extent(),
                        EntityInterest::Isa,
                    )
                    .await?;

                    Ok(IsaChange {
                        isa: deleted,
                        subscribers: subscribers_to_notify(&subs),
                    })
                })
            })
            .await?;

        info!(isa_id = %id, "isa deleted");
        Ok(change)
    }
}

/// Union two precomputed extents (cells merged, widest time window).
pub(crate) fn union_extents(a: Volume4D, b: Volume4D) -> Volume4D {
    let cells = match (&a.footprint, &b.footprint) {
        (Some(FootprintSource::Cells(ca)), Some(FootprintSource::Cells(cb))) => ca.merged(cb),
        (Some(FootprintSource::Cells(ca)), _) => ca.clone(),
        (_, Some(FootprintSource::Cells(cb))) => cb.clone(),
        _ => Default::default(),
    };
    Volume4D::from_cells(
        cells,
        min_opt(a.starts_at, b.starts_at),
        max_opt(a.ends_at, b.ends_at),
        min_opt_f(a.altitude_lo, b.altitude_lo),
        max_opt_f(a.altitude_hi, b.altitude_hi),
    )
}

fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn min_opt_f(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt_f(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
