//! Operational intent handlers: the 4-D strategic deconfliction core.
//!
//! A write commits only when the client proves it has seen the current
//! version of every conflicting entity (the OVN key check), and every
//! intent leaves the transaction covered by a subscription: supplied,
//! widened or synthesized.

use chrono::Utc;
use dss_models::{
    AvailabilityStatus, ConflictingEntity, DssError, EntityKind, IntentState, OperationalIntent,
    Owner, Ovn, Subscription, Volume4D,
};
use dss_store::{boxed, Repository, Store};
use tracing::info;
use uuid::Uuid;

use crate::isa::union_extents;
use crate::{
    bump_overlapping_subscribers, subscribers_to_notify, subscription::check_slot_cap,
    EntityInterest, Service, SubscriberToNotify,
};

#[derive(Debug, Clone)]
pub struct IntentChange {
    pub intent: OperationalIntent,
    pub subscribers: Vec<SubscriberToNotify>,
}

#[derive(Debug, Clone)]
pub struct NewSubscriptionParams {
    pub base_url: String,
    pub notify_for_constraints: bool,
}

#[derive(Debug, Clone)]
pub struct PutIntentParams {
    pub extents: Vec<Volume4D>,
    /// OVNs of every conflicting entity the client has seen.
    pub key: Vec<Ovn>,
    pub state: IntentState,
    pub base_url: String,
    pub subscription_id: Option<Uuid>,
    /// Used to synthesize an implicit subscription when no
    /// `subscription_id` is given.
    pub new_subscription: Option<NewSubscriptionParams>,
}

impl<S: Store> Service<S> {
    pub async fn get_operational_intent(
        &self,
        owner: Owner,
        id: Uuid,
    ) -> Result<OperationalIntent, DssError> {
        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    let op = repo
                        .get_operation(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))?;
                    Ok(op.redacted_for(&owner))
                })
            })
            .await
    }

    pub async fn query_operational_intents(
        &self,
        owner: Owner,
        aoi: Volume4D,
    ) -> Result<Vec<OperationalIntent>, DssError> {
        if let Some(end) = aoi.ends_at {
            if end < Utc::now() {
                return Err(DssError::BadRequest("end time is in the past".to_string()));
            }
        }
        let cover = self.cover();
        let cells = aoi.covering(&cover)?;
        let vol = Volume4D::from_cells(cells, aoi.starts_at, aoi.ends_at, aoi.altitude_lo, aoi.altitude_hi);

        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    let ops = repo.search_operations(&vol).await?;
                    Ok(ops
                        .into_iter()
                        .map(|op| op.redacted_for(&owner))
                        .collect())
                })
            })
            .await
    }

    /// PUT /operational_intent_references/{entityid}[/{ovn}].
    pub async fn put_operational_intent(
        &self,
        owner: Owner,
        id: Uuid,
        path_ovn: Option<Ovn>,
        params: PutIntentParams,
    ) -> Result<IntentChange, DssError> {
        dss_models::validate_uss_base_url(&params.base_url)?;
        if params.extents.is_empty() {
            return Err(DssError::BadRequest("missing required extents".to_string()));
        }

        // Union the requested extents and cover them before the
        // transaction opens.
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

        let params = params.clone();
        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let path_ovn = path_ovn.clone();
                let params = params.clone();
                let union = union.clone();
                let cells = cells.clone();
                boxed(async move {
                    let old = repo.get_operation(id).await?;

                    match (&old, &path_ovn) {
                        (None, Some(_)) => return Err(DssError::NotFound(id.to_string())),
                        (Some(_), None) => {
                            return Err(DssError::AlreadyExists(id.to_string()))
                        }
                        (Some(stored), Some(ovn)) => {
                            if stored.owner != owner {
                                return Err(DssError::PermissionDenied(format!(
                                    "operational intent is owned by {}",
                                    stored.owner
                                )));
                            }
                            if stored.ovn != *ovn {
                                return Err(DssError::VersionMismatch(format!(
                                    "{} is not the current OVN",
                                    ovn
                                )));
                            }
                        }
                        (None, None) => {}
                    }

                    // State machine.
                    let old_state = old.as_ref().map(|o| o.state);
                    if !IntentState::transition_allowed(old_state, params.state) {
                        return Err(DssError::BadRequest(match old_state {
                            None => format!(
                                "invalid state for version 0: {}",
                                params.state.as_str()
                            ),
                            Some(from) => format!(
                                "invalid state transition {} -> {}",
                                from.as_str(),
                                params.state.as_str()
                            ),
                        }));
                    }

                    // A USS arbitrated Down cannot move intents into the
                    // strategic states.
                    if params.state.requires_availability() && old_state != Some(params.state) {
                        let availability = repo.get_availability(&owner.0).await?;
                        if availability.map(|a| a.status) == Some(AvailabilityStatus::Down) {
                            return Err(DssError::PreconditionFailed(format!(
                                "USS {owner} is declared Down and may not transition to {}",
                                params.state.as_str()
                            )));
                        }
                    }

                    // Fencing-key check over the union of pre- and
                    // post-image extents.
                    let conflict_vol = match &old {
                        Some(o) => union_extents(union.clone(), o.extent()),
                        None => union.clone(),
                    };
                    let missing =
                        missing_ovns(repo, &conflict_vol, id, &owner, &params.key).await?;
                    if !missing.is_empty() {
                        return Err(DssError::MissingOvns(missing));
                    }

                    // Every intent leaves the transaction covered by a
                    // subscription.
                    let previous_sub = old.as_ref().map(|o| o.subscription_id);
                    let subscription_id = ensure_subscription_coverage(
                        repo,
                        &owner,
                        &union,
                        &cells,
                        params.subscription_id,
                        params.new_subscription.as_ref(),
                        &params.base_url,
                    )
                    .await?;

                    let op = OperationalIntent {
                        id,
                        owner,
                        url: params.base_url.clone(),
                        cells,
                        starts_at: union.starts_at,
                        ends_at: union.ends_at,
                        altitude_lower: union.altitude_lo,
                        altitude_upper: union.altitude_hi,
                        state: params.state,
                        ovn: Ovn::empty(), // minted by the repository
                        version: old.as_ref().map_or(1, |o| o.version + 1),
                        subscription_id,
                        writer: None,
                        updated_at: old.as_ref().and_then(|o| o.updated_at),
                    };
                    let op = repo.upsert_operation(op).await?;

                    // Re-pointing away from an implicit subscription may
                    // orphan it; collect it in the same transaction.
                    if let Some(prev) = previous_sub {
                        if prev != subscription_id {
                            collect_orphaned_implicit_subscription(repo, prev).await?;
                        }
                    }

                    let subs = bump_overlapping_subscribers(
                        repo,
                        &conflict_vol,
                        EntityInterest::Operation,
                    )
                    .await?;

                    Ok(IntentChange {
                        intent: op,
                        subscribers: subscribers_to_notify(&subs),
                    })
                })
            })
            .await?;

        info!(intent_id = %id, version = change.intent.version, "operational intent upserted");
        Ok(change)
    }

    /// DELETE /operational_intent_references/{entityid}/{ovn}.
    pub async fn delete_operational_intent(
        &self,
        owner: Owner,
        id: Uuid,
        path_ovn: Ovn,
    ) -> Result<IntentChange, DssError> {
        let change = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let owner = owner.clone();
                let path_ovn = path_ovn.clone();
                boxed(async move {
                    let old = repo
                        .get_operation(id)
                        .await?
                        .ok_or_else(|| DssError::NotFound(id.to_string()))?;
                    if old.owner != owner {
                        return Err(DssError::PermissionDenied(format!(
                            "operational intent is owned by {}",
                            old.owner
                        )));
                    }
                    if old.ovn != path_ovn {
                        return Err(DssError::VersionMismatch(format!(
                            "{path_ovn} is not the current OVN"
                        )));
                    }

                    repo.delete_operation(id).await?;
                    collect_orphaned_implicit_subscription(repo, old.subscription_id).await?;

                    let subs = bump_overlapping_subscribers(
                        repo,
                        &old.extent(),
                        EntityInterest::Operation,
                    )
                    .await?;

                    Ok(IntentChange {
                        intent: old,
                        subscribers: subscribers_to_notify(&subs),
                    })
                })
            })
            .await?;

        info!(intent_id = %id, "operational intent deleted");
        Ok(change)
    }
}

/// Conflicting entities (intents and constraints overlapping the volume,
/// other id, other owner) whose current OVN the client failed to supply.
async fn missing_ovns(
    repo: &mut dyn Repository,
    conflict_vol: &Volume4D,
    own_id: Uuid,
    owner: &Owner,
    key: &[Ovn],
) -> Result<Vec<ConflictingEntity>, DssError> {
    let mut missing = Vec::new();

    for op in repo.search_operations(conflict_vol).await? {
        if op.id == own_id || op.owner == *owner {
            continue;
        }
        if !key.contains(&op.ovn) {
            missing.push(ConflictingEntity {
                entity_id: op.id,
                kind: EntityKind::OperationalIntent,
                ovn: Ovn::empty(), // never leak another owner's OVN
            });
        }
    }
    for c in repo.search_constraints(conflict_vol).await? {
        if c.owner == *owner {
            continue;
        }
        if !key.contains(&c.ovn) {
            missing.push(ConflictingEntity {
                entity_id: c.id,
                kind: EntityKind::Constraint,
                ovn: Ovn::empty(),
            });
        }
    }
    Ok(missing)
}

/// Resolve the subscription that will cover the intent: load and verify a
/// supplied one (widening implicit subscriptions in place), or synthesize
/// an implicit subscription covering exactly this extent.
async fn ensure_subscription_coverage(
    repo: &mut dyn Repository,
    owner: &Owner,
    extent: &Volume4D,
    cells: &dss_geo::CellUnion,
    subscription_id: Option<Uuid>,
    new_subscription: Option<&NewSubscriptionParams>,
    intent_base_url: &str,
) -> Result<Uuid, DssError> {
    match subscription_id {
        Some(sub_id) => {
            let mut sub = repo.get_subscription(sub_id).await?.ok_or_else(|| {
                DssError::BadRequest("specified subscription does not exist".to_string())
            })?;
            if sub.owner != *owner {
                return Err(DssError::PermissionDenied(format!(
                    "subscription is owned by {}",
                    sub.owner
                )));
            }

            if !sub.contains_extent(extent, cells) {
                if !sub.implicit {
                    return Err(DssError::BadRequest(
                        "subscription does not cover the entire extent of the operational intent"
                            .to_string(),
                    ));
                }
                sub.widen_to(extent, cells);
                sub = repo.upsert_subscription(sub).await?;
            }
            Ok(sub.id)
        }
        None => {
            let base_url = new_subscription
                .map(|n| n.base_url.as_str())
                .unwrap_or(intent_base_url);
            dss_models::validate_uss_base_url(base_url)?;

            let sub = Subscription {
                id: Uuid::new_v4(),
                owner: owner.clone(),
                url: base_url.to_string(),
                notification_index: 0,
                notify_for_operations: true,
                notify_for_constraints: new_subscription
                    .map_or(false, |n| n.notify_for_constraints),
                implicit: true,
                cells: cells.clone(),
                starts_at: extent.starts_at,
                ends_at: extent.ends_at,
                altitude_lo: extent.altitude_lo,
                altitude_hi: extent.altitude_hi,
                writer: None,
                version: None,
            };
            check_slot_cap(repo, owner, cells, false).await?;
            let sub = repo.upsert_subscription(sub).await?;
            Ok(sub.id)
        }
    }
}

/// Delete an implicit subscription once no intent references it.
async fn collect_orphaned_implicit_subscription(
    repo: &mut dyn Repository,
    subscription_id: Uuid,
) -> Result<(), DssError> {
    let Some(sub) = repo.get_subscription(subscription_id).await? else {
        return Ok(());
    };
    if !sub.implicit {
        return Ok(());
    }
    if !repo.operations_by_subscription(subscription_id).await?.is_empty() {
        return Ok(());
    }
    let version = sub
        .version
        .ok_or_else(|| DssError::Internal("stored subscription without version".to_string()))?;
    repo.delete_subscription(subscription_id, version).await?;
    Ok(())
}
