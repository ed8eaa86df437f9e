//! Opaque version numbers.
//!
//! OVNs are the cross-entity fencing tokens of strategic deconfliction: a
//! client mutating an operational intent must present the current OVN of
//! every conflicting entity. Unlike the timestamp [`crate::Version`], an OVN
//! is a cryptographic nonce: leaking one reveals nothing about the entity,
//! and holding a stale one cannot be fixed up by guessing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ovn(String);

impl Ovn {
    pub fn new(s: String) -> Ovn {
        Ovn(s)
    }

    pub fn empty() -> Ovn {
        Ovn(String::new())
    }

    /// Derive a fresh OVN for a successful write.
    ///
    /// Deterministic in (id, version, write timestamp) plus a per-process
    /// secret, so reissuing an old value is cryptographically improbable
    /// while retries inside one transaction stay stable.
    pub fn generate(id: Uuid, version: i32, written_at: DateTime<Utc>, secret: &str) -> Ovn {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b"|");
        hasher.update(id.as_bytes());
        hasher.update(version.to_be_bytes());
        hasher.update(written_at.to_rfc3339().as_bytes());
        Ovn(BASE64.encode(hasher.finalize()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Client-supplied OVNs must land in the standard length band.
    pub fn is_valid(&self) -> bool {
        (16..=128).contains(&self.0.len())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ovn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
