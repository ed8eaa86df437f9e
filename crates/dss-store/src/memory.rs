//! In-memory store double.
//!
//! Mirrors the Postgres repository's observable semantics closely enough
//! that service-logic tests run against it unchanged: fencing-token checks,
//! liveness filters, notification bumps, copy-on-write commit/rollback.
//! One async mutex serializes transactions, which trivially satisfies the
//! serializable isolation contract.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use dss_models::{
    Constraint, DssError, IdentificationServiceArea, OperationalIntent, Owner, Ovn, Report,
    Subscription, UssAvailability, Version, Volume4D,
};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Repository, Store, StoreConfig};

#[derive(Debug, Clone, Default)]
struct MemState {
    isas: HashMap<Uuid, IdentificationServiceArea>,
    subscriptions: HashMap<Uuid, Subscription>,
    operations: HashMap<Uuid, OperationalIntent>,
    constraints: HashMap<Uuid, Constraint>,
    availabilities: HashMap<String, UssAvailability>,
    reports: Vec<Report>,
}

pub struct MemStore {
    state: Mutex<MemState>,
    cfg: StoreConfig,
}

impl MemStore {
    pub fn new(cfg: StoreConfig) -> MemStore {
        MemStore {
            state: Mutex::new(MemState::default()),
            cfg,
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Store for MemStore {
    fn transact<'s, T, F>(&'s self, mut f: F) -> BoxFuture<'s, Result<T, DssError>>
    where
        T: Send + 'static,
        F: for<'r> FnMut(&'r mut dyn Repository) -> BoxFuture<'r, Result<T, DssError>>
            + Send
            + 's,
    {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            let mut repo = MemRepository {
                state: guard.clone(),
                cfg: self.cfg.clone(),
                now: Utc::now(),
            };
            match f(&mut repo).await {
                Ok(v) => {
                    *guard = repo.state;
                    Ok(v)
                }
                Err(e) => Err(e),
            }
        })
    }

    fn interact<'s, T, F>(&'s self, f: F) -> BoxFuture<'s, Result<T, DssError>>
    where
        T: Send + 'static,
        F: for<'r> FnOnce(&'r mut dyn Repository) -> BoxFuture<'r, Result<T, DssError>>
            + Send
            + 's,
    {
        Box::pin(async move {
            let guard = self.state.lock().await;
            let mut repo = MemRepository {
                state: guard.clone(),
                cfg: self.cfg.clone(),
                now: Utc::now(),
            };
            drop(guard);
            // changes made through an interact repo are discarded
            f(&mut repo).await
        })
    }
}

struct MemRepository {
    state: MemState,
    cfg: StoreConfig,
    now: DateTime<Utc>,
}

impl MemRepository {
    fn version_now(&self) -> Version {
        Version::from_timestamp(self.now)
    }

    /// Mirror of the SQL search predicate: `ends_at >= greatest(now,
    /// earliest)`, `coalesce(starts_at <= latest, true)`, cell overlap and
    /// altitude-band overlap.
    fn matches(
        &self,
        extent: &Volume4D,
        cells: &CellUnion,
        vol: &Volume4D,
        vol_cells: &CellUnion,
    ) -> bool {
        let earliest = vol.starts_at.map_or(self.now, |e| e.max(self.now));
        if let Some(ends) = extent.ends_at {
            if ends < earliest {
                return false;
            }
        }
        if let (Some(starts), Some(latest)) = (extent.starts_at, vol.ends_at) {
            if starts > latest {
                return false;
            }
        }
        if let (Some(hi), Some(lo)) = (extent.altitude_hi, vol.altitude_lo) {
            if hi < lo {
                return false;
            }
        }
        if let (Some(lo), Some(hi)) = (extent.altitude_lo, vol.altitude_hi) {
            if lo > hi {
                return false;
            }
        }
        cells.intersects(vol_cells)
    }
}

#[async_trait]
impl Repository for MemRepository {
    async fn now(&mut self) -> Result<DateTime<Utc>, DssError> {
        Ok(self.now)
    }

    // -- Identification service areas --------------------------------------

    async fn get_isa(&mut self, id: Uuid) -> Result<Option<IdentificationServiceArea>, DssError> {
        Ok(self.state.isas.get(&id).cloned())
    }

    async fn upsert_isa(
        &mut self,
        mut isa: IdentificationServiceArea,
    ) -> Result<IdentificationServiceArea, DssError> {
        match isa.version {
            None => {
                if self.state.isas.contains_key(&isa.id) {
                    return Err(DssError::AlreadyExists(isa.id.to_string()));
                }
            }
            Some(expected) => match self.state.isas.get(&isa.id) {
                Some(stored) if stored.version == Some(expected) => {}
                _ => return Err(DssError::VersionMismatch("old version".to_string())),
            },
        }

        isa.version = Some(self.version_now());
        isa.writer = self.cfg.locality.clone();
        self.state.isas.insert(isa.id, isa.clone());
        Ok(isa)
    }

    async fn delete_isa(
        &mut self,
        id: Uuid,
        expected: Version,
    ) -> Result<IdentificationServiceArea, DssError> {
        match self.state.isas.get(&id) {
            Some(stored) if stored.version == Some(expected) => {
                Ok(self.state.isas.remove(&id).unwrap())
            }
            _ => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn search_isas(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<IdentificationServiceArea>, DssError> {
        let vol_cells = vol.covering(&self.cfg.cover)?;
        let mut out: Vec<_> = self
            .state
            .isas
            .values()
            .filter(|isa| self.matches(&isa.extent(), &isa.cells, vol, &vol_cells))
            .cloned()
            .collect();
        out.sort_by_key(|isa| isa.id);
        Ok(out)
    }

    // -- Subscriptions -----------------------------------------------------

    async fn get_subscription(&mut self, id: Uuid) -> Result<Option<Subscription>, DssError> {
        Ok(self.state.subscriptions.get(&id).cloned())
    }

    async fn upsert_subscription(
        &mut self,
        mut sub: Subscription,
    ) -> Result<Subscription, DssError> {
        match sub.version {
            None => {
                if self.state.subscriptions.contains_key(&sub.id) {
                    return Err(DssError::AlreadyExists(sub.id.to_string()));
                }
                sub.notification_index = 0;
            }
            Some(expected) => match self.state.subscriptions.get(&sub.id) {
                Some(stored) if stored.version == Some(expected) => {
                    // the bump counter survives rewrites untouched
                    sub.notification_index = stored.notification_index;
                }
                _ => return Err(DssError::VersionMismatch("old version".to_string())),
            },
        }

        sub.version = Some(self.version_now());
        sub.writer = self.cfg.locality.clone();
        self.state.subscriptions.insert(sub.id, sub.clone());
        Ok(sub)
    }

    async fn delete_subscription(
        &mut self,
        id: Uuid,
        expected: Version,
    ) -> Result<Subscription, DssError> {
        match self.state.subscriptions.get(&id) {
            Some(stored) if stored.version == Some(expected) => {
                Ok(self.state.subscriptions.remove(&id).unwrap())
            }
            _ => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn search_subscriptions(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<Subscription>, DssError> {
        let vol_cells = vol.covering(&self.cfg.cover)?;
        let mut out: Vec<_> = self
            .state
            .subscriptions
            .values()
            .filter(|s| self.matches(&s.extent(), &s.cells, vol, &vol_cells))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    async fn search_subscriptions_by_owner(
        &mut self,
        cells: &CellUnion,
        owner: &Owner,
    ) -> Result<Vec<Subscription>, DssError> {
        let mut out: Vec<_> = self
            .state
            .subscriptions
            .values()
            .filter(|s| {
                s.owner == *owner
                    && s.ends_at.map_or(true, |e| e >= self.now)
                    && s.cells.intersects(cells)
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    async fn increment_notification_indices(
        &mut self,
        ids: &[Uuid],
    ) -> Result<Vec<i32>, DssError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let sub = self.state.subscriptions.get_mut(id).ok_or_else(|| {
                DssError::Internal(format!("notification bump for unknown subscription {id}"))
            })?;
            sub.notification_index += 1;
            out.push(sub.notification_index);
        }
        Ok(out)
    }

    async fn max_subscriptions_per_cell(
        &mut self,
        owner: &Owner,
        cells: &CellUnion,
    ) -> Result<i64, DssError> {
        let mut per_cell: HashMap<u64, i64> = HashMap::new();
        for sub in self.state.subscriptions.values() {
            if sub.owner != *owner || sub.ends_at.map_or(false, |e| e < self.now) {
                continue;
            }
            for cell in sub.cells.cells() {
                if cells.contains_cell(*cell) {
                    *per_cell.entry(cell.0).or_insert(0) += 1;
                }
            }
        }
        Ok(per_cell.values().copied().max().unwrap_or(0))
    }

    // -- Operational intents -----------------------------------------------

    async fn get_operation(&mut self, id: Uuid) -> Result<Option<OperationalIntent>, DssError> {
        Ok(self.state.operations.get(&id).cloned())
    }

    async fn upsert_operation(
        &mut self,
        mut op: OperationalIntent,
    ) -> Result<OperationalIntent, DssError> {
        match op.updated_at {
            None => {
                if self.state.operations.contains_key(&op.id) {
                    return Err(DssError::AlreadyExists(op.id.to_string()));
                }
            }
            Some(expected) => match self.state.operations.get(&op.id) {
                Some(stored) if stored.updated_at == Some(expected) => {}
                _ => return Err(DssError::VersionMismatch("old version".to_string())),
            },
        }

        op.ovn = Ovn::generate(op.id, op.version, self.now, &self.cfg.ovn_secret);
        op.updated_at = Some(self.version_now());
        op.writer = self.cfg.locality.clone();
        self.state.operations.insert(op.id, op.clone());
        Ok(op)
    }

    async fn delete_operation(&mut self, id: Uuid) -> Result<(), DssError> {
        self.state
            .operations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DssError::NotFound(id.to_string()))
    }

    async fn search_operations(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<OperationalIntent>, DssError> {
        let vol_cells = vol.covering(&self.cfg.cover)?;
        let mut out: Vec<_> = self
            .state
            .operations
            .values()
            .filter(|op| self.matches(&op.extent(), &op.cells, vol, &vol_cells))
            .cloned()
            .collect();
        out.sort_by_key(|op| op.id);
        Ok(out)
    }

    async fn operations_by_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Vec<OperationalIntent>, DssError> {
        let mut out: Vec<_> = self
            .state
            .operations
            .values()
            .filter(|op| op.subscription_id == subscription_id)
            .cloned()
            .collect();
        out.sort_by_key(|op| op.id);
        Ok(out)
    }

    // -- Constraints -------------------------------------------------------

    async fn get_constraint(&mut self, id: Uuid) -> Result<Option<Constraint>, DssError> {
        Ok(self.state.constraints.get(&id).cloned())
    }

    async fn upsert_constraint(
        &mut self,
        mut constraint: Constraint,
    ) -> Result<Constraint, DssError> {
        match constraint.updated_at {
            None => {
                if self.state.constraints.contains_key(&constraint.id) {
                    return Err(DssError::AlreadyExists(constraint.id.to_string()));
                }
            }
            Some(expected) => match self.state.constraints.get(&constraint.id) {
                Some(stored) if stored.updated_at == Some(expected) => {}
                _ => return Err(DssError::VersionMismatch("old version".to_string())),
            },
        }

        constraint.ovn = Ovn::generate(
            constraint.id,
            constraint.version,
            self.now,
            &self.cfg.ovn_secret,
        );
        constraint.updated_at = Some(self.version_now());
        constraint.writer = self.cfg.locality.clone();
        self.state
            .constraints
            .insert(constraint.id, constraint.clone());
        Ok(constraint)
    }

    async fn delete_constraint(&mut self, id: Uuid) -> Result<(), DssError> {
        self.state
            .constraints
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DssError::NotFound(id.to_string()))
    }

    async fn search_constraints(&mut self, vol: &Volume4D) -> Result<Vec<Constraint>, DssError> {
        let vol_cells = vol.covering(&self.cfg.cover)?;
        let mut out: Vec<_> = self
            .state
            .constraints
            .values()
            .filter(|c| self.matches(&c.extent(), &c.cells, vol, &vol_cells))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    // -- USS availability --------------------------------------------------

    async fn get_availability(
        &mut self,
        uss_id: &str,
    ) -> Result<Option<UssAvailability>, DssError> {
        Ok(self.state.availabilities.get(uss_id).cloned())
    }

    async fn upsert_availability(
        &mut self,
        mut availability: UssAvailability,
    ) -> Result<UssAvailability, DssError> {
        availability.version = Some(self.version_now());
        self.state
            .availabilities
            .insert(availability.uss_id.clone(), availability.clone());
        Ok(availability)
    }

    // -- Reports -----------------------------------------------------------

    async fn insert_report(&mut self, payload: Value) -> Result<Report, DssError> {
        let report = Report {
            id: Uuid::new_v4(),
            payload,
            created_at: self.now,
        };
        self.state.reports.push(report.clone());
        Ok(report)
    }
}
