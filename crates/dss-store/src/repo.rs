//! The repository capability set.
//!
//! Every method runs against the ambient transaction (or, via
//! `Store::interact`, a bare connection). Mutating methods mint the fresh
//! fencing tokens themselves (`updated_at` from the transaction timestamp,
//! OVNs from it plus the process secret), so a retried closure observes
//! stable values within one attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use dss_models::{
    Constraint, DssError, IdentificationServiceArea, OperationalIntent, Owner, Report,
    Subscription, UssAvailability, Version, Volume4D,
};
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait Repository: Send {
    /// Timestamp stable for the lifetime of the surrounding transaction.
    async fn now(&mut self) -> Result<DateTime<Utc>, DssError>;

    // -- Identification service areas --------------------------------------

    async fn get_isa(&mut self, id: Uuid) -> Result<Option<IdentificationServiceArea>, DssError>;

    /// Insert (no version) or update (version must match the stored
    /// `updated_at`). Returns the row with its fresh version.
    async fn upsert_isa(
        &mut self,
        isa: IdentificationServiceArea,
    ) -> Result<IdentificationServiceArea, DssError>;

    /// Delete at exactly `expected`; anything else is a version mismatch.
    async fn delete_isa(
        &mut self,
        id: Uuid,
        expected: Version,
    ) -> Result<IdentificationServiceArea, DssError>;

    /// Live ISAs overlapping the volume (cells ∧ time ∧ `ends_at ≥ now`).
    async fn search_isas(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<IdentificationServiceArea>, DssError>;

    // -- Subscriptions -----------------------------------------------------

    async fn get_subscription(&mut self, id: Uuid) -> Result<Option<Subscription>, DssError>;

    async fn upsert_subscription(&mut self, sub: Subscription) -> Result<Subscription, DssError>;

    async fn delete_subscription(
        &mut self,
        id: Uuid,
        expected: Version,
    ) -> Result<Subscription, DssError>;

    /// Live subscriptions overlapping the volume, regardless of owner.
    /// This is the notify-set query.
    async fn search_subscriptions(&mut self, vol: &Volume4D) -> Result<Vec<Subscription>, DssError>;

    /// Live subscriptions of `owner` touching `cells` (RID area search).
    async fn search_subscriptions_by_owner(
        &mut self,
        cells: &CellUnion,
        owner: &Owner,
    ) -> Result<Vec<Subscription>, DssError>;

    /// Atomically bump each subscription's notification index by one.
    /// Returned indices are in input order.
    async fn increment_notification_indices(
        &mut self,
        ids: &[Uuid],
    ) -> Result<Vec<i32>, DssError>;

    /// Highest per-cell count of `owner`'s live subscriptions across
    /// `cells` (the DSS0030 slot check).
    async fn max_subscriptions_per_cell(
        &mut self,
        owner: &Owner,
        cells: &CellUnion,
    ) -> Result<i64, DssError>;

    // -- Operational intents -----------------------------------------------

    async fn get_operation(&mut self, id: Uuid) -> Result<Option<OperationalIntent>, DssError>;

    /// Insert or update; mints the new OVN from the transaction timestamp.
    async fn upsert_operation(
        &mut self,
        op: OperationalIntent,
    ) -> Result<OperationalIntent, DssError>;

    async fn delete_operation(&mut self, id: Uuid) -> Result<(), DssError>;

    async fn search_operations(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<OperationalIntent>, DssError>;

    /// Back-edge lookup: intents referencing a subscription. Drives the
    /// delete protection and implicit-subscription garbage collection.
    async fn operations_by_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Vec<OperationalIntent>, DssError>;

    // -- Constraints -------------------------------------------------------

    async fn get_constraint(&mut self, id: Uuid) -> Result<Option<Constraint>, DssError>;

    async fn upsert_constraint(&mut self, constraint: Constraint) -> Result<Constraint, DssError>;

    async fn delete_constraint(&mut self, id: Uuid) -> Result<(), DssError>;

    async fn search_constraints(&mut self, vol: &Volume4D) -> Result<Vec<Constraint>, DssError>;

    // -- USS availability --------------------------------------------------

    async fn get_availability(&mut self, uss_id: &str)
        -> Result<Option<UssAvailability>, DssError>;

    async fn upsert_availability(
        &mut self,
        availability: UssAvailability,
    ) -> Result<UssAvailability, DssError>;

    // -- Reports -----------------------------------------------------------

    async fn insert_report(&mut self, payload: Value) -> Result<Report, DssError>;
}
