//! Persistence for the DSS.
//!
//! Two [`Store`] implementations share one [`Repository`] capability set:
//! [`PgStore`] speaks to Postgres through sqlx, [`MemStore`] is a faithful
//! in-memory double used by service-logic tests. Handlers never see which
//! one they run on.
//!
//! All mutations flow through [`Store::transact`], which supplies a
//! repository bound to a serializable transaction and retries the closure
//! on contention. Closures must therefore own their captured data and be
//! free of observable side effects other than through the repository;
//! notification payloads are *returned* to the caller, never dispatched
//! from inside.

pub mod memory;
pub mod postgres;
pub mod repo;

pub use memory::MemStore;
pub use postgres::PgStore;
pub use repo::Repository;

use std::time::Duration;

use dss_geo::CoverConfig;
use dss_models::DssError;
use futures::future::BoxFuture;

/// Major schema version this binary requires. Startup refuses to serve a
/// database whose `schema_versions` row disagrees.
pub const REQUIRED_MAJOR_SCHEMA_VERSION: u32 = 3;

/// Total wall-time budget for one `transact` call, retries included.
pub const DEFAULT_TRANSACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings both store implementations need at write time.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Per-process secret folded into OVN derivation.
    pub ovn_secret: String,
    /// Locality tag written into the entities' `writer` column.
    pub locality: Option<String>,
    pub cover: CoverConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ovn_secret: "insecure-dev-secret".to_string(),
            locality: None,
            cover: CoverConfig::default(),
        }
    }
}

/// Supplies repositories to service logic.
pub trait Store: Send + Sync + 'static {
    /// Run `f` under a serializable transaction, retrying bounded-ly on
    /// contention. On success the transaction is committed before the
    /// result is returned; on error everything rolls back.
    fn transact<'s, T, F>(&'s self, f: F) -> BoxFuture<'s, Result<T, DssError>>
    where
        T: Send + 'static,
        F: for<'r> FnMut(&'r mut dyn Repository) -> BoxFuture<'r, Result<T, DssError>>
            + Send
            + 's;

    /// Run `f` against a non-transactional repository, for read paths that
    /// tolerate read-committed semantics.
    fn interact<'s, T, F>(&'s self, f: F) -> BoxFuture<'s, Result<T, DssError>>
    where
        T: Send + 'static,
        F: for<'r> FnOnce(&'r mut dyn Repository) -> BoxFuture<'r, Result<T, DssError>>
            + Send
            + 's;
}

/// Box a transaction-closure future. Keeps call sites down to
/// `store.transact(|repo| boxed(async move { … }))`.
pub fn boxed<'r, T>(
    fut: impl std::future::Future<Output = Result<T, DssError>> + Send + 'r,
) -> BoxFuture<'r, Result<T, DssError>> {
    Box::pin(fut)
}

/// Parse a `schema_versions.schema_version` value (`v3.1.0` or `3.1.0`)
/// into its major component.
pub fn schema_major(version: &str) -> Result<u32, DssError> {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    let major = trimmed
        .split('.')
        .next()
        .unwrap_or_default()
        .parse::<u32>()
        .map_err(|_| DssError::Internal(format!("unparseable schema version: {version}")))?;
    Ok(major)
}
