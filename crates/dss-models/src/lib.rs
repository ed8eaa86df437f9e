//! Data model for the DSS: airspace entities, subscriptions, fencing tokens
//! and the typed error taxonomy shared by every layer above.
//!
//! Nothing here touches the network or the database. The store crate maps
//! these types to rows; the daemon crate maps them to wire DTOs.

pub mod availability;
pub mod constraint;
pub mod error;
pub mod isa;
pub mod operation;
pub mod ovn;
pub mod report;
pub mod subscription;
pub mod version;
pub mod volume;

pub use availability::{AvailabilityStatus, UssAvailability};
pub use constraint::Constraint;
pub use error::{ConflictingEntity, DssError, EntityKind};
pub use isa::IdentificationServiceArea;
pub use operation::{IntentState, OperationalIntent};
pub use ovn::Ovn;
pub use report::Report;
pub use subscription::Subscription;
pub use version::Version;
pub use volume::{FootprintSource, Volume4D};

use serde::{Deserialize, Serialize};

/// The client principal an entity belongs to, extracted from the access
/// token's `sub` claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(pub String);

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Owner {
    fn from(s: &str) -> Self {
        Owner(s.to_string())
    }
}

/// Validate a USS callback base URL. Peers are contacted over TLS only.
pub fn validate_uss_base_url(url: &str) -> Result<(), DssError> {
    if url.starts_with("https://") && url.len() > "https://".len() {
        return Ok(());
    }
    if url.starts_with("http://") {
        return Err(DssError::BadRequest(
            "uss_base_url must use TLS".to_string(),
        ));
    }
    Err(DssError::BadRequest(
        "uss_base_url must support https scheme".to_string(),
    ))
}
