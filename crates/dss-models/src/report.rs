//! Error reports: write-only archival records filed by USSs. Each POST gets
//! a fresh ID; there is no read path.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Report {
    pub id: Uuid,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
