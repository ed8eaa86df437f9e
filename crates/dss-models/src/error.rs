//! Typed error taxonomy.
//!
//! Service handlers and repositories return `DssError`; the transaction
//! runner preserves it across retries and the daemon maps each kind to its
//! HTTP status. `MissingOvns` is the one kind carrying a structured payload
//! (the airspace-conflict response) instead of a bare message.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::Ovn;

/// The kind of airspace entity a conflict reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    OperationalIntent,
    Constraint,
}

/// A conflicting entity the client must hold the current OVN for.
///
/// The OVN field is redacted (empty) unless the caller owns the entity; the
/// caller obtains missing OVNs over the USS-to-USS channel, not from us.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictingEntity {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub ovn: Ovn,
}

#[derive(Debug, Error)]
pub enum DssError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    VersionMismatch(String),

    /// An operational-intent write lacked the OVNs of listed conflicting
    /// entities. Maps to 409 with an airspace-conflict body.
    #[error("missing OVNs for {} conflicting entities", .0.len())]
    MissingOvns(Vec<ConflictingEntity>),

    /// A state transition is blocked, e.g. by the USS being marked Down.
    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    AreaTooLarge(String),

    /// Per-area resource caps (subscription slots) or rate envelopes.
    #[error("{0}")]
    Exhausted(String),

    /// Serializable-transaction contention that did not resolve within the
    /// retry deadline.
    #[error("too much contention, please retry")]
    TransientConflict,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Internal(String),
}

impl DssError {
    /// Whether the daemon should hide the message behind a constant string.
    pub fn is_internal(&self) -> bool {
        matches!(self, DssError::Internal(_))
    }
}

impl From<dss_geo::GeoError> for DssError {
    fn from(err: dss_geo::GeoError) -> Self {
        match err {
            dss_geo::GeoError::AreaTooLarge { .. } => DssError::AreaTooLarge(err.to_string()),
            other => DssError::BadRequest(other.to_string()),
        }
    }
}
