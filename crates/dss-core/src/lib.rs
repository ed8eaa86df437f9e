//! Service logic: one handler per (entity, verb), every one of them the
//! same pipeline.
//!
//! 1. Validate inputs and compute derived state (extent union, cell cover)
//!    *outside* the transaction.
//! 2. Inside `store.transact`: read the old row, authorize the caller,
//!    check fencing tokens, run entity-specific invariants, persist, then
//!    compute the notify-set and bump each subscriber's notification index.
//! 3. Assemble the response: the entity plus `(subscription, base_url,
//!    fresh index)` tuples. The DSS never calls subscribers itself; the
//!    mutating client dispatches after commit.

pub mod availability;
pub mod constraint;
pub mod isa;
pub mod operational_intent;
pub mod report;
pub mod subscription;

use std::collections::BTreeMap;

use dss_geo::CoverConfig;
use dss_models::{DssError, Subscription, Volume4D};
use dss_store::{Repository, Store};
use uuid::Uuid;

/// Per (owner, cell) live-subscription cap, from requirement DSS0030.
pub const MAX_SUBSCRIPTIONS_PER_CELL: i64 = 10;

/// The service façade the wire layers call into.
pub struct Service<S: Store> {
    store: S,
    cover: CoverConfig,
}

impl<S: Store> Service<S> {
    pub fn new(store: S, cover: CoverConfig) -> Service<S> {
        Service { store, cover }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn cover(&self) -> CoverConfig {
        self.cover
    }
}

/// One USS callback URL with the subscriptions (and fresh notification
/// indices) behind it, grouped so the mutating client makes one call per
/// peer.
#[derive(Debug, Clone)]
pub struct SubscriberToNotify {
    pub url: String,
    pub subscriptions: Vec<(Uuid, i32)>,
}

/// Group bumped subscriptions by their callback URL.
pub fn subscribers_to_notify(subs: &[Subscription]) -> Vec<SubscriberToNotify> {
    let mut by_url: BTreeMap<String, Vec<(Uuid, i32)>> = BTreeMap::new();
    for s in subs {
        by_url
            .entry(s.url.clone())
            .or_default()
            .push((s.id, s.notification_index));
    }
    by_url
        .into_iter()
        .map(|(url, subscriptions)| SubscriberToNotify { url, subscriptions })
        .collect()
}

/// Which subscriptions care about a given entity mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityInterest {
    /// Every overlapping subscription (remote-ID discovery).
    Isa,
    Operation,
    Constraint,
}

/// Find the live subscriptions overlapping `vol` that are interested in
/// the mutated entity type, bump each notification index by one, and
/// return them with the fresh indices. Runs inside the caller's
/// transaction, so the bump and the mutation commit or roll back together.
pub(crate) async fn bump_overlapping_subscribers(
    repo: &mut dyn Repository,
    vol: &Volume4D,
    interest: EntityInterest,
) -> Result<Vec<Subscription>, DssError> {
    let all = repo.search_subscriptions(vol).await?;
    let mut subs: Vec<Subscription> = all
        .into_iter()
        .filter(|s| match interest {
            EntityInterest::Isa => true,
            EntityInterest::Operation => s.notify_for_operations,
            EntityInterest::Constraint => s.notify_for_constraints,
        })
        .collect();

    let ids: Vec<Uuid> = subs.iter().map(|s| s.id).collect();
    let fresh = repo.increment_notification_indices(&ids).await?;
    for (sub, index) in subs.iter_mut().zip(fresh) {
        sub.notification_index = index;
    }
    Ok(subs)
}
