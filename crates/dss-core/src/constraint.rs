//! Constraint reference handlers.
//!
//! Constraints are OVN-fenced like operational intents but carry no
//! lifecycle state, no subscription coupling and no fencing-key
//! requirement of their own; their OVNs participate in *intents'* keys.

use chrono::Utc;
use dss_models::{Constraint, DssError, Owner, Ovn, Volume4D};
use dss_store::{boxed, Repository, Store};
use tracing::info;
use uuid::Uuid;

use crate::isa::union_extents;
use crate::{
    bump_overlapping_subscribers, subscribers_to_notify, EntityInterest, Service,
    SubscriberToNotify,
};

#[derive(Debug, Clone)]
pub struct ConstraintChange {
    pub constraint: Constraint,
    pub subscribers: Vec<SubscriberToNotify>,
}

#[derive(Debug, Clone)]
pub struct PutConstraintParams {
    pub extents: Vec<Volume4D>,
    pub base_url: String,
}

impl<S: Store> Service<S> {
    pub async fn get_constraint(&self, owner: Owner, id: Uuid) -> Result<Constraint, DssError> {
        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    let c = repo
                        .get_constraint(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))?;
                    Ok(c.redacted_for(&owner))
                })
            })
            .await
    }

    pub async fn query_constraints(
        &self,
        owner: Owner,
        aoi: Volume4D,
    ) -> Result<Vec<Constraint>, DssError> {
        let cover = self.cover();
        let cells = aoi.covering(&cover)?;
        let vol = Volume4D::from_cells(cells, aoi.starts_at, aoi.ends_at, aoi.altitude_lo, aoi.altitude_hi);

        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    let constraints = repo.search_constraints(&vol).await?;
                    Ok(constraints
                        .into_iter()
                        .map(|c| c.redacted_for(&owner))
                        .collect())
                })
            })
            .await
    }

    /// PUT /constraint_references/{entityid}[/{ovn}].
    pub async fn put_constraint(
        &self,
        owner: Owner,
        id: Uuid,
        path_ovn: Option<Ovn>,
        params: PutConstraintParams,
    ) -> Result<ConstraintChange, DssError> {
        dss_models::validate_uss_base_url(&params.base_url)?;
        if params.extents.is_empty() {
            return Err(DssError::BadRequest("missing required extents".to_string()));
        }

        let cover = self.cover();
        let union = Volume4D::union(&params.extents, &cover)?;
        let starts_at = union
            .starts_at
            .ok_or_else(|| DssError::BadRequest("missing time_start from extents".to_string()))?;
        let ends_at = union
            .ends_at
            .ok_or_else(|| DssError::BadRequest("missing time_end from extents".to_string()))?;
        if ends_at <= starts_at {
            return Err(DssError::BadRequest(
                "time_end must be after time_start".to_string(),
            ));
        }
        if ends_at < Utc::now() {
            return Err(DssError::BadRequest("time_end is in the past".to_string()));
        }
        let cells = union.covering(&cover)?;
        let union = Volume4D::from_cells(
            cells.clone(),
            Some(starts_at),
            Some(ends_at),
            union.altitude_lo,
            union.altitude_hi,
        );

        let base_url = params.base_url.clone();
        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let path_ovn = path_ovn.clone();
                let base_url = base_url.clone();
                let union = union.clone();
                let cells = cells.clone();
                boxed(async move {
                    let old = repo.get_constraint(id).await?;

                    match (&old, &path_ovn) {
                        (None, Some(_)) => return Err(DssError::NotFound(id.to_string())),
                        (Some(_), None) => {
                            return Err(DssError::AlreadyExists(id.to_string()))
                        }
                        (Some(stored), Some(ovn)) => {
                            if stored.owner != owner {
                                return Err(DssError::PermissionDenied(format!(
                                    "constraint is owned by {}",
                                    stored.owner
                                )));
                            }
                            if stored.ovn != *ovn {
                                return Err(DssError::VersionMismatch(format!(
                                    "{ovn} is not the current OVN"
                                )));
                            }
                        }
                        (None, None) => {}
                    }

                    let constraint = Constraint {
                        id,
                        owner,
                        url: base_url,
                        cells,
                        starts_at: union.starts_at,
                        ends_at: union.ends_at,
                        altitude_lower: union.altitude_lo,
                        altitude_upper: union.altitude_hi,
                        ovn: Ovn::empty(), // minted by the repository
                        version: old.as_ref().map_or(1, |c| c.version + 1),
                        writer: None,
                        updated_at: old.as_ref().and_then(|c| c.updated_at),
                    };
                    let constraint = repo.upsert_constraint(constraint).await?;

                    let notify_vol = match &old {
                        Some(o) => union_extents(union.clone(), o.extent()),
                        None => union.clone(),
                    };
                    let subs = bump_overlapping_subscribers(
                        repo,
                        &notify_vol,
                        EntityInterest::Constraint,
                    )
                    .await?;

                    Ok(ConstraintChange {
                        constraint,
                        subscribers: subscribers_to_notify(&subs),
                    })
                })
            })
            .await?;

        info!(constraint_id = %id, version = change.constraint.version, "constraint upserted");
        Ok(change)
    }

    /// DELETE /constraint_references/{entityid}/{ovn}.
    pub async fn delete_constraint(
        &self,
        owner: Owner,
        id: Uuid,
        path_ovn: Ovn,
    ) -> Result<ConstraintChange, DssError> {
        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let path_ovn = path_ovn.clone();
                boxed(async move {
                    let old = repo
                        .get_constraint(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))?;
                    if old.owner != owner {
                        return Err(DssError::PermissionDenied(format!(
                            "constraint is owned by {}",
                            old.owner
                        )));
                    }
                    if old.ovn != path_ovn {
                        return Err(DssError::VersionMismatch(format!(
                            "{path_ovn} is not the current OVN"
                        )));
                    }

                    repo.delete_constraint(id).await?;
                    let subs = bump_overlapping_subscribers(
                        repo,
                        &old.extent(),
                        EntityInterest::Constraint,
                    )
                    .await?;

                    Ok(ConstraintChange {
                        constraint: old,
                        subscribers: subscribers_to_notify(&subs),
                    })
                })
            })
            .await?;

        info!(constraint_id = %id, "constraint deleted");
        Ok(change)
    }
}
