//! Postgres-backed store.
//!
//! Queries mint fencing tokens with `transaction_timestamp()` so every
//! write inside one transaction carries the same version, and the
//! `UPDATE … WHERE id = $1 AND updated_at = $n` shape enforces optimistic
//! concurrency in a single statement. Spatial overlap uses the GIN-friendly
//! array predicate `cells && $n`.

use std::ops::DerefMut;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dss_geo::CellUnion;
use dss_models::{
    AvailabilityStatus, Constraint, DssError, IdentificationServiceArea, IntentState,
    OperationalIntent, Owner, Ovn, Report, Subscription, UssAvailability, Version, Volume4D,
};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::warn;
use uuid::Uuid;

use crate::{
    schema_major, Repository, Store, StoreConfig, DEFAULT_TRANSACT_TIMEOUT,
    REQUIRED_MAJOR_SCHEMA_VERSION,
};

const ISA_FIELDS: &str = "id, owner, url, cells, starts_at, ends_at, writer, updated_at";
const SUBSCRIPTION_FIELDS: &str = "id, owner, url, notification_index, notify_for_operations, \
     notify_for_constraints, implicit, cells, starts_at, ends_at, altitude_lo, altitude_hi, \
     writer, updated_at";
const OPERATION_FIELDS: &str = "id, owner, url, cells, starts_at, ends_at, altitude_lower, \
     altitude_upper, state, ovn, version, subscription_id, writer, updated_at";
const CONSTRAINT_FIELDS: &str = "id, owner, url, cells, starts_at, ends_at, altitude_lower, \
     altitude_upper, ovn, version, writer, updated_at";

pub struct PgStore {
    pool: PgPool,
    cfg: StoreConfig,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, cfg: StoreConfig) -> PgStore {
        PgStore {
            pool,
            cfg,
            timeout: DEFAULT_TRANSACT_TIMEOUT,
        }
    }

    /// Override the total retry budget of `transact`.
    pub fn with_timeout(mut self, timeout: Duration) -> PgStore {
        self.timeout = timeout;
        self
    }

    /// Connect a bounded pool.
    pub async fn connect(
        url: &str,
        max_open_conns: u32,
        max_conn_idle: Duration,
        cfg: StoreConfig,
    ) -> Result<PgStore, DssError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_open_conns)
            .idle_timeout(max_conn_idle)
            .connect(url)
            .await
            .map_err(map_db_err)?;
        Ok(PgStore::new(pool, cfg))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> Result<(), DssError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DssError::Internal(format!("db migrate failed: {e}")))
    }

    /// Schema gate: refuse to serve a database whose schema major does not
    /// match this binary. Returns the full version string on success.
    pub async fn check_schema(&self) -> Result<String, DssError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = 'schema_versions'
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;

        if !exists {
            return Err(DssError::Internal(
                "database has not been bootstrapped (no schema_versions table); run migrations"
                    .to_string(),
            ));
        }

        let (version,): (String,) = sqlx::query_as(
            "SELECT schema_version FROM schema_versions WHERE onerow_enforcer = TRUE",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;

        let major = schema_major(&version)?;
        if major != REQUIRED_MAJOR_SCHEMA_VERSION {
            return Err(DssError::Internal(format!(
                "unsupported schema version {version}; this binary requires major version {REQUIRED_MAJOR_SCHEMA_VERSION}"
            )));
        }
        Ok(version)
    }
}

impl Store for PgStore {
    fn transact<'s, T, F>(&'s self, mut f: F) -> BoxFuture<'s, Result<T, DssError>>
    where
        T: Send + 'static,
        F: for<'r> FnMut(&'r mut dyn Repository) -> BoxFuture<'r, Result<T, DssError>>
            + Send
            + 's,
    {
        Box::pin(async move {
            let started = Instant::now();
            let mut backoff = Duration::from_millis(10);

            loop {
                let tx = self.pool.begin().await.map_err(map_db_err)?;
                let mut repo = PgRepository {
                    conn: tx,
                    cfg: self.cfg.clone(),
                    txn_now: None,
                };
                sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                    .execute(&mut *repo.conn)
                    .await
                    .map_err(map_db_err)?;

                // A panic in `f` drops the Transaction, which rolls back.
                let outcome: Result<T, DssError> = match f(&mut repo).await {
                    Ok(v) => match repo.conn.commit().await {
                        Ok(()) => return Ok(v),
                        Err(e) => Err(map_db_err(e)),
                    },
                    Err(e) => {
                        if let Err(rb) = repo.conn.rollback().await {
                            warn!(error = %rb, "transaction rollback failed");
                        }
                        Err(e)
                    }
                };

                match outcome {
                    Err(DssError::TransientConflict)
                        if started.elapsed() + backoff < self.timeout =>
                    {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_millis(640));
                    }
                    Err(e) => return Err(e),
                    Ok(_) => unreachable!("commit success returns above"),
                }
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
            let conn = self.pool.acquire().await.map_err(map_db_err)?;
            let mut repo = PgRepository {
                conn,
                cfg: self.cfg.clone(),
                txn_now: None,
            };
            f(&mut repo).await
        })
    }
}

/// Classify driver errors: serialization failures and deadlocks retry,
/// unique violations surface as conflicts, the rest is internal.
fn map_db_err(e: sqlx::Error) -> DssError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("40001") | Some("40P01") => return DssError::TransientConflict,
            Some("23505") => return DssError::AlreadyExists("entity".to_string()),
            _ => {}
        }
    }
    DssError::Internal(format!("database error: {e}"))
}

trait RowExt {
    fn col<'r, T>(&'r self, name: &str) -> Result<T, DssError>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>;
}

impl RowExt for PgRow {
    fn col<'r, T>(&'r self, name: &str) -> Result<T, DssError>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        self.try_get(name)
            .map_err(|e| DssError::Internal(format!("column {name}: {e}")))
    }
}

fn cells_from_row(row: &PgRow) -> Result<CellUnion, DssError> {
    let raw: Vec<i64> = row.col("cells")?;
    CellUnion::from_i64s(&raw)
        .map_err(|e| DssError::Internal(format!("stored cells are invalid: {e}")))
}

fn isa_from_row(row: &PgRow) -> Result<IdentificationServiceArea, DssError> {
    let updated_at: DateTime<Utc> = row.col("updated_at")?;
    Ok(IdentificationServiceArea {
        id: row.col("id")?,
        owner: Owner(row.col::<String>("owner")?),
        url: row.col("url")?,
        cells: cells_from_row(row)?,
        starts_at: row.col("starts_at")?,
        ends_at: row.col("ends_at")?,
        writer: row.col("writer")?,
        version: Some(Version::from_timestamp(updated_at)),
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, DssError> {
    let updated_at: DateTime<Utc> = row.col("updated_at")?;
    Ok(Subscription {
        id: row.col("id")?,
        owner: Owner(row.col::<String>("owner")?),
        url: row.col("url")?,
        notification_index: row.col("notification_index")?,
        notify_for_operations: row.col("notify_for_operations")?,
        notify_for_constraints: row.col("notify_for_constraints")?,
        implicit: row.col("implicit")?,
        cells: cells_from_row(row)?,
        starts_at: row.col("starts_at")?,
        ends_at: row.col("ends_at")?,
        altitude_lo: row.col("altitude_lo")?,
        altitude_hi: row.col("altitude_hi")?,
        writer: row.col("writer")?,
        version: Some(Version::from_timestamp(updated_at)),
    })
}

fn operation_from_row(row: &PgRow) -> Result<OperationalIntent, DssError> {
    let updated_at: DateTime<Utc> = row.col("updated_at")?;
    Ok(OperationalIntent {
        id: row.col("id")?,
        owner: Owner(row.col::<String>("owner")?),
        url: row.col("url")?,
        cells: cells_from_row(row)?,
        starts_at: row.col("starts_at")?,
        ends_at: row.col("ends_at")?,
        altitude_lower: row.col("altitude_lower")?,
        altitude_upper: row.col("altitude_upper")?,
        state: IntentState::parse(&row.col::<String>("state")?)?,
        ovn: Ovn::new(row.col("ovn")?),
        version: row.col("version")?,
        subscription_id: row.col("subscription_id")?,
        writer: row.col("writer")?,
        updated_at: Some(Version::from_timestamp(updated_at)),
    })
}

fn constraint_from_row(row: &PgRow) -> Result<Constraint, DssError> {
    let updated_at: DateTime<Utc> = row.col("updated_at")?;
    Ok(Constraint {
        id: row.col("id")?,
        owner: Owner(row.col::<String>("owner")?),
        url: row.col("url")?,
        cells: cells_from_row(row)?,
        starts_at: row.col("starts_at")?,
        ends_at: row.col("ends_at")?,
        altitude_lower: row.col("altitude_lower")?,
        altitude_upper: row.col("altitude_upper")?,
        ovn: Ovn::new(row.col("ovn")?),
        version: row.col("version")?,
        writer: row.col("writer")?,
        updated_at: Some(Version::from_timestamp(updated_at)),
    })
}

struct PgRepository<C: DerefMut<Target = PgConnection> + Send> {
    conn: C,
    cfg: StoreConfig,
    txn_now: Option<DateTime<Utc>>,
}

impl<C: DerefMut<Target = PgConnection> + Send> PgRepository<C> {
    /// 4-D search bind order: $1 earliest, $2 latest, $3 cells,
    /// $4 altitude_lo, $5 altitude_hi.
    fn search_binds(
        vol: &Volume4D,
        cells: &CellUnion,
    ) -> (
        Option<DateTime<Utc>>,
        Option<DateTime<Utc>>,
        Vec<i64>,
        Option<f64>,
        Option<f64>,
    ) {
        (
            vol.starts_at,
            vol.ends_at,
            cells.to_i64s(),
            vol.altitude_lo,
            vol.altitude_hi,
        )
    }
}

#[async_trait]
impl<C: DerefMut<Target = PgConnection> + Send> Repository for PgRepository<C> {
    async fn now(&mut self) -> Result<DateTime<Utc>, DssError> {
        if let Some(t) = self.txn_now {
            return Ok(t);
        }
        let row = sqlx::query("SELECT transaction_timestamp() AS now")
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        let t: DateTime<Utc> = row.col("now")?;
        self.txn_now = Some(t);
        Ok(t)
    }

    // -- Identification service areas --------------------------------------

    async fn get_isa(&mut self, id: Uuid) -> Result<Option<IdentificationServiceArea>, DssError> {
        let query = format!("SELECT {ISA_FIELDS} FROM identification_service_areas WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(isa_from_row).transpose()
    }

    async fn upsert_isa(
        &mut self,
        isa: IdentificationServiceArea,
    ) -> Result<IdentificationServiceArea, DssError> {
        let row = match isa.version {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO identification_service_areas ({ISA_FIELDS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, transaction_timestamp())
                    RETURNING {ISA_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(isa.id)
                    .bind(&isa.owner.0)
                    .bind(&isa.url)
                    .bind(isa.cells.to_i64s())
                    .bind(isa.starts_at)
                    .bind(isa.ends_at)
                    .bind(&self.cfg.locality)
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
            Some(expected) => {
                let query = format!(
                    r#"
                    UPDATE identification_service_areas
                    SET url = $2, cells = $3, starts_at = $4, ends_at = $5, writer = $6,
                        updated_at = transaction_timestamp()
                    WHERE id = $1 AND updated_at = $7
                    RETURNING {ISA_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(isa.id)
                    .bind(&isa.url)
                    .bind(isa.cells.to_i64s())
                    .bind(isa.starts_at)
                    .bind(isa.ends_at)
                    .bind(&self.cfg.locality)
                    .bind(expected.to_timestamp())
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
        };

        match row {
            Some(r) => isa_from_row(&r),
            None => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn delete_isa(
        &mut self,
        id: Uuid,
        expected: Version,
    ) -> Result<IdentificationServiceArea, DssError> {
        let query = format!(
            r#"
            DELETE FROM identification_service_areas
            WHERE id = $1 AND updated_at = $2
            RETURNING {ISA_FIELDS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(expected.to_timestamp())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        match row {
            Some(r) => isa_from_row(&r),
            None => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn search_isas(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<IdentificationServiceArea>, DssError> {
        let cells = vol.covering(&self.cfg.cover)?;
        let (earliest, latest, cids, _, _) = Self::search_binds(vol, &cells);
        let query = format!(
            r#"
            SELECT {ISA_FIELDS} FROM identification_service_areas
            WHERE ends_at >= GREATEST(transaction_timestamp(), COALESCE($1::timestamptz, transaction_timestamp()))
            AND COALESCE(starts_at <= $2::timestamptz, TRUE)
            AND cells && $3::bigint[]
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(earliest)
            .bind(latest)
            .bind(cids)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(isa_from_row).collect()
    }

    // -- Subscriptions -----------------------------------------------------

    async fn get_subscription(&mut self, id: Uuid) -> Result<Option<Subscription>, DssError> {
        let query = format!("SELECT {SUBSCRIPTION_FIELDS} FROM subscriptions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn upsert_subscription(&mut self, sub: Subscription) -> Result<Subscription, DssError> {
        let row = match sub.version {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO subscriptions (id, owner, url, notify_for_operations,
                        notify_for_constraints, implicit, cells, starts_at, ends_at,
                        altitude_lo, altitude_hi, writer, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, transaction_timestamp())
                    RETURNING {SUBSCRIPTION_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(sub.id)
                    .bind(&sub.owner.0)
                    .bind(&sub.url)
                    .bind(sub.notify_for_operations)
                    .bind(sub.notify_for_constraints)
                    .bind(sub.implicit)
                    .bind(sub.cells.to_i64s())
                    .bind(sub.starts_at)
                    .bind(sub.ends_at)
                    .bind(sub.altitude_lo)
                    .bind(sub.altitude_hi)
                    .bind(&self.cfg.locality)
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
            Some(expected) => {
                // notification_index is deliberately left alone: bumps are
                // the only writer of that column.
                let query = format!(
                    r#"
                    UPDATE subscriptions
                    SET url = $2, notify_for_operations = $3, notify_for_constraints = $4,
                        implicit = $5, cells = $6, starts_at = $7, ends_at = $8,
                        altitude_lo = $9, altitude_hi = $10, writer = $11,
                        updated_at = transaction_timestamp()
                    WHERE id = $1 AND updated_at = $12
                    RETURNING {SUBSCRIPTION_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(sub.id)
                    .bind(&sub.url)
                    .bind(sub.notify_for_operations)
                    .bind(sub.notify_for_constraints)
                    .bind(sub.implicit)
                    .bind(sub.cells.to_i64s())
                    .bind(sub.starts_at)
                    .bind(sub.ends_at)
                    .bind(sub.altitude_lo)
                    .bind(sub.altitude_hi)
                    .bind(&self.cfg.locality)
                    .bind(expected.to_timestamp())
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
        };

        match row {
            Some(r) => subscription_from_row(&r),
            None => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn delete_subscription(
        &mut self,
        id: Uuid,
        expected: Version,
    ) -> Result<Subscription, DssError> {
        let query = format!(
            r#"
            DELETE FROM subscriptions
            WHERE id = $1 AND updated_at = $2
            RETURNING {SUBSCRIPTION_FIELDS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(expected.to_timestamp())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        match row {
            Some(r) => subscription_from_row(&r),
            None => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn search_subscriptions(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<Subscription>, DssError> {
        let cells = vol.covering(&self.cfg.cover)?;
        let (earliest, latest, cids, alt_lo, alt_hi) = Self::search_binds(vol, &cells);
        let query = format!(
            r#"
            SELECT {SUBSCRIPTION_FIELDS} FROM subscriptions
            WHERE ends_at >= GREATEST(transaction_timestamp(), COALESCE($1::timestamptz, transaction_timestamp()))
            AND COALESCE(starts_at <= $2::timestamptz, TRUE)
            AND cells && $3::bigint[]
            AND ($4::float8 IS NULL OR altitude_hi IS NULL OR altitude_hi >= $4)
            AND ($5::float8 IS NULL OR altitude_lo IS NULL OR altitude_lo <= $5)
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(earliest)
            .bind(latest)
            .bind(cids)
            .bind(alt_lo)
            .bind(alt_hi)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn search_subscriptions_by_owner(
        &mut self,
        cells: &CellUnion,
        owner: &Owner,
    ) -> Result<Vec<Subscription>, DssError> {
        let query = format!(
            r#"
            SELECT {SUBSCRIPTION_FIELDS} FROM subscriptions
            WHERE owner = $1
            AND cells && $2::bigint[]
            AND ends_at >= transaction_timestamp()
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(&owner.0)
            .bind(cells.to_i64s())
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn increment_notification_indices(
        &mut self,
        ids: &[Uuid],
    ) -> Result<Vec<i32>, DssError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET notification_index = notification_index + 1
            WHERE id = ANY($1::uuid[])
            RETURNING id, notification_index
            "#,
        )
        .bind(ids.to_vec())
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_db_err)?;

        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.col("id")?;
            let index: i32 = row.col("notification_index")?;
            by_id.insert(id, index);
        }
        ids.iter()
            .map(|id| {
                by_id.get(id).copied().ok_or_else(|| {
                    DssError::Internal(format!("notification bump for unknown subscription {id}"))
                })
            })
            .collect()
    }

    async fn max_subscriptions_per_cell(
        &mut self,
        owner: &Owner,
        cells: &CellUnion,
    ) -> Result<i64, DssError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(cnt), 0)::bigint AS max_count
            FROM (
                SELECT COUNT(*) AS cnt
                FROM subscriptions s, UNNEST(s.cells) AS cell
                WHERE s.owner = $1
                AND cell = ANY($2::bigint[])
                AND s.ends_at >= transaction_timestamp()
                GROUP BY cell
            ) AS per_cell
            "#,
        )
        .bind(&owner.0)
        .bind(cells.to_i64s())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_db_err)?;
        row.col("max_count")
    }

    // -- Operational intents -----------------------------------------------

    async fn get_operation(&mut self, id: Uuid) -> Result<Option<OperationalIntent>, DssError> {
        let query = format!("SELECT {OPERATION_FIELDS} FROM operations WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(operation_from_row).transpose()
    }

    async fn upsert_operation(
        &mut self,
        op: OperationalIntent,
    ) -> Result<OperationalIntent, DssError> {
        let txn_now = self.now().await?;
        let ovn = Ovn::generate(op.id, op.version, txn_now, &self.cfg.ovn_secret);

        let row = match op.updated_at {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO operations ({OPERATION_FIELDS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                            transaction_timestamp())
                    RETURNING {OPERATION_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(op.id)
                    .bind(&op.owner.0)
                    .bind(&op.url)
                    .bind(op.cells.to_i64s())
                    .bind(op.starts_at)
                    .bind(op.ends_at)
                    .bind(op.altitude_lower)
                    .bind(op.altitude_upper)
                    .bind(op.state.as_str())
                    .bind(ovn.as_str())
                    .bind(op.version)
                    .bind(op.subscription_id)
                    .bind(&self.cfg.locality)
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
            Some(expected) => {
                let query = format!(
                    r#"
                    UPDATE operations
                    SET url = $2, cells = $3, starts_at = $4, ends_at = $5,
                        altitude_lower = $6, altitude_upper = $7, state = $8, ovn = $9,
                        version = $10, subscription_id = $11, writer = $12,
                        updated_at = transaction_timestamp()
                    WHERE id = $1 AND updated_at = $13
                    RETURNING {OPERATION_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(op.id)
                    .bind(&op.url)
                    .bind(op.cells.to_i64s())
                    .bind(op.starts_at)
                    .bind(op.ends_at)
                    .bind(op.altitude_lower)
                    .bind(op.altitude_upper)
                    .bind(op.state.as_str())
                    .bind(ovn.as_str())
                    .bind(op.version)
                    .bind(op.subscription_id)
                    .bind(&self.cfg.locality)
                    .bind(expected.to_timestamp())
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
        };

        match row {
            Some(r) => operation_from_row(&r),
            None => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn delete_operation(&mut self, id: Uuid) -> Result<(), DssError> {
        let res = sqlx::query("DELETE FROM operations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        if res.rows_affected() == 0 {
            return Err(DssError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn search_operations(
        &mut self,
        vol: &Volume4D,
    ) -> Result<Vec<OperationalIntent>, DssError> {
        let cells = vol.covering(&self.cfg.cover)?;
        let (earliest, latest, cids, alt_lo, alt_hi) = Self::search_binds(vol, &cells);
        let query = format!(
            r#"
            SELECT {OPERATION_FIELDS} FROM operations
            WHERE ends_at >= GREATEST(transaction_timestamp(), COALESCE($1::timestamptz, transaction_timestamp()))
            AND COALESCE(starts_at <= $2::timestamptz, TRUE)
            AND cells && $3::bigint[]
            AND ($4::float8 IS NULL OR altitude_upper IS NULL OR altitude_upper >= $4)
            AND ($5::float8 IS NULL OR altitude_lower IS NULL OR altitude_lower <= $5)
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(earliest)
            .bind(latest)
            .bind(cids)
            .bind(alt_lo)
            .bind(alt_hi)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(operation_from_row).collect()
    }

    async fn operations_by_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Vec<OperationalIntent>, DssError> {
        let query = format!(
            "SELECT {OPERATION_FIELDS} FROM operations WHERE subscription_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(subscription_id)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(operation_from_row).collect()
    }

    // -- Constraints -------------------------------------------------------

    async fn get_constraint(&mut self, id: Uuid) -> Result<Option<Constraint>, DssError> {
        let query = format!("SELECT {CONSTRAINT_FIELDS} FROM constraints WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(constraint_from_row).transpose()
    }

    async fn upsert_constraint(&mut self, c: Constraint) -> Result<Constraint, DssError> {
        let txn_now = self.now().await?;
        let ovn = Ovn::generate(c.id, c.version, txn_now, &self.cfg.ovn_secret);

        let row = match c.updated_at {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO constraints ({CONSTRAINT_FIELDS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                            transaction_timestamp())
                    RETURNING {CONSTRAINT_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(c.id)
                    .bind(&c.owner.0)
                    .bind(&c.url)
                    .bind(c.cells.to_i64s())
                    .bind(c.starts_at)
                    .bind(c.ends_at)
                    .bind(c.altitude_lower)
                    .bind(c.altitude_upper)
                    .bind(ovn.as_str())
                    .bind(c.version)
                    .bind(&self.cfg.locality)
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
            Some(expected) => {
                let query = format!(
                    r#"
                    UPDATE constraints
                    SET url = $2, cells = $3, starts_at = $4, ends_at = $5,
                        altitude_lower = $6, altitude_upper = $7, ovn = $8, version = $9,
                        writer = $10, updated_at = transaction_timestamp()
                    WHERE id = $1 AND updated_at = $11
                    RETURNING {CONSTRAINT_FIELDS}
                    "#
                );
                sqlx::query(&query)
                    .bind(c.id)
                    .bind(&c.url)
                    .bind(c.cells.to_i64s())
                    .bind(c.starts_at)
                    .bind(c.ends_at)
                    .bind(c.altitude_lower)
                    .bind(c.altitude_upper)
                    .bind(ovn.as_str())
                    .bind(c.version)
                    .bind(&self.cfg.locality)
                    .bind(expected.to_timestamp())
                    .fetch_optional(&mut *self.conn)
                    .await
                    .map_err(map_db_err)?
            }
        };

        match row {
            Some(r) => constraint_from_row(&r),
            None => Err(DssError::VersionMismatch("old version".to_string())),
        }
    }

    async fn delete_constraint(&mut self, id: Uuid) -> Result<(), DssError> {
        let res = sqlx::query("DELETE FROM constraints WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        if res.rows_affected() == 0 {
            return Err(DssError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn search_constraints(&mut self, vol: &Volume4D) -> Result<Vec<Constraint>, DssError> {
        let cells = vol.covering(&self.cfg.cover)?;
        let (earliest, latest, cids, alt_lo, alt_hi) = Self::search_binds(vol, &cells);
        let query = format!(
            r#"
            SELECT {CONSTRAINT_FIELDS} FROM constraints
            WHERE ends_at >= GREATEST(transaction_timestamp(), COALESCE($1::timestamptz, transaction_timestamp()))
            AND COALESCE(starts_at <= $2::timestamptz, TRUE)
            AND cells && $3::bigint[]
            AND ($4::float8 IS NULL OR altitude_upper IS NULL OR altitude_upper >= $4)
            AND ($5::float8 IS NULL OR altitude_lower IS NULL OR altitude_lower <= $5)
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(earliest)
            .bind(latest)
            .bind(cids)
            .bind(alt_lo)
            .bind(alt_hi)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(constraint_from_row).collect()
    }

    // -- USS availability --------------------------------------------------

    async fn get_availability(
        &mut self,
        uss_id: &str,
    ) -> Result<Option<UssAvailability>, DssError> {
        let row = sqlx::query("SELECT id, availability, updated_at FROM uss_availabilities WHERE id = $1")
            .bind(uss_id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_db_err)?;
        row.map(|r| {
            let updated_at: DateTime<Utc> = r.col("updated_at")?;
            Ok(UssAvailability {
                uss_id: r.col("id")?,
                status: AvailabilityStatus::parse(&r.col::<String>("availability")?)?,
                version: Some(Version::from_timestamp(updated_at)),
            })
        })
        .transpose()
    }

    async fn upsert_availability(
        &mut self,
        availability: UssAvailability,
    ) -> Result<UssAvailability, DssError> {
        let row = sqlx::query(
            r#"
            INSERT INTO uss_availabilities (id, availability, updated_at)
            VALUES ($1, $2, transaction_timestamp())
            ON CONFLICT (id) DO UPDATE
                SET availability = EXCLUDED.availability,
                    updated_at = EXCLUDED.updated_at
            RETURNING id, availability, updated_at
            "#,
        )
        .bind(&availability.uss_id)
        .bind(availability.status.as_str())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_db_err)?;

        let updated_at: DateTime<Utc> = row.col("updated_at")?;
        Ok(UssAvailability {
            uss_id: row.col("id")?,
            status: AvailabilityStatus::parse(&row.col::<String>("availability")?)?,
            version: Some(Version::from_timestamp(updated_at)),
        })
    }

    // -- Reports -----------------------------------------------------------

    async fn insert_report(&mut self, payload: Value) -> Result<Report, DssError> {
        let row = sqlx::query(
            r#"
            INSERT INTO reports (id, payload, created_at)
            VALUES ($1, $2, transaction_timestamp())
            RETURNING id, payload, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payload)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_db_err)?;

        Ok(Report {
            id: row.col("id")?,
            payload: row.col("payload")?,
            created_at: row.col("created_at")?,
        })
    }
}
