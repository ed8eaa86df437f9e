//! Access-token validation and per-endpoint scope checks.
//!
//! Tokens are RS256 JWTs. Key material comes from PEM files on disk or a
//! JWKS endpoint refreshed on a timer into a read-mostly cache; a daemon
//! configured with neither runs with signature validation disabled (dev
//! mode) and says so loudly at startup.
//!
//! An endpoint declares one or more *accepted scope sets*; a token passes
//! iff it presents at least one accepted set in full. The `sub` claim
//! becomes the entity owner for everything downstream.

pub mod scopes;

use std::sync::RwLock;
use std::time::Duration;

use dss_models::{DssError, Owner};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{info, warn};

pub use scopes::*;

/// Where verification keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// RSA public keys in PEM files.
    Files(Vec<String>),
    /// A JWKS endpoint plus the `kid`s to accept from it (all when empty).
    Jwks { endpoint: String, key_ids: Vec<String> },
    /// No verification. Claims are still parsed; for development only.
    Insecure,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwksKey>,
}

#[derive(Debug, Deserialize)]
struct JwksKey {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

/// The claims the DSS cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    /// Space-separated OAuth scopes.
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    pub exp: usize,
}

impl Claims {
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }
}

pub struct Authorizer {
    source: KeySource,
    keys: RwLock<Vec<DecodingKey>>,
    accepted_audiences: Vec<String>,
}

impl Authorizer {
    /// Build and perform the initial key load. Fails hard on unreadable
    /// PEM files; JWKS failures at boot are fatal too (a DSS that cannot
    /// verify tokens must not serve).
    pub async fn new(
        source: KeySource,
        accepted_audiences: Vec<String>,
    ) -> Result<Authorizer, DssError> {
        if accepted_audiences.is_empty() {
            warn!("no accepted JWT audiences configured; aud validation disabled");
        }
        if matches!(source, KeySource::Insecure) {
            warn!("operating WITHOUT token signature validation; dev mode only");
        }

        let authorizer = Authorizer {
            source,
            keys: RwLock::new(Vec::new()),
            accepted_audiences,
        };
        authorizer.refresh_keys().await?;
        Ok(authorizer)
    }

    /// (Re)load verification keys from the configured source.
    pub async fn refresh_keys(&self) -> Result<(), DssError> {
        let fresh = match &self.source {
            KeySource::Insecure => Vec::new(),
            KeySource::Files(paths) => {
                let mut keys = Vec::with_capacity(paths.len());
                for path in paths {
                    let pem = std::fs::read(path).map_err(|e| {
                        DssError::Internal(format!("reading public key {path}: {e}"))
                    })?;
                    keys.push(DecodingKey::from_rsa_pem(&pem).map_err(|e| {
                        DssError::Internal(format!("parsing public key {path}: {e}"))
                    })?);
                }
                keys
            }
            KeySource::Jwks { endpoint, key_ids } => {
                let doc: JwksDocument = reqwest::get(endpoint)
                    .await
                    .map_err(|e| DssError::Internal(format!("fetching JWKS: {e}")))?
                    .json()
                    .await
                    .map_err(|e| DssError::Internal(format!("decoding JWKS: {e}")))?;

                let mut keys = Vec::new();
                for key in doc.keys {
                    if key.kty != "RSA" {
                        continue;
                    }
                    if !key_ids.is_empty() && !key_ids.contains(&key.kid) {
                        continue;
                    }
                    keys.push(DecodingKey::from_rsa_components(&key.n, &key.e).map_err(
                        |e| DssError::Internal(format!("JWKS key {}: {e}", key.kid)),
                    )?);
                }
                if keys.is_empty() {
                    return Err(DssError::Internal(
                        "JWKS endpoint yielded no usable RSA keys".to_string(),
                    ));
                }
                keys
            }
        };

        let count = fresh.len();
        *self.keys.write().expect("key cache poisoned") = fresh;
        info!(keys = count, "verification keys refreshed");
        Ok(())
    }

    /// Validate a bearer token against one of the accepted scope sets and
    /// return the caller's identity.
    pub fn authorize(
        &self,
        token: Option<&str>,
        accepted_scope_sets: &[&[&str]],
    ) -> Result<Owner, DssError> {
        let token = token
            .ok_or_else(|| DssError::Unauthenticated("missing access token".to_string()))?;

        let claims = self.decode_claims(token)?;

        if claims.sub.is_empty() {
            return Err(DssError::Unauthenticated(
                "access token missing sub claim".to_string(),
            ));
        }

        let presented = claims.scopes();
        let satisfied = accepted_scope_sets
            .iter()
            .any(|set| set.iter().all(|scope| presented.contains(scope)));
        if !satisfied {
            return Err(DssError::PermissionDenied(format!(
                "access token missing scopes; accepted scope sets: {accepted_scope_sets:?}"
            )));
        }

        Ok(Owner(claims.sub))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, DssError> {
        let mut validation = Validation::new(Algorithm::RS256);
        if self.accepted_audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.accepted_audiences);
        }

        if matches!(self.source, KeySource::Insecure) {
            validation.insecure_disable_signature_validation();
            let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
                .map_err(|e| DssError::Unauthenticated(format!("invalid access token: {e}")))?;
            return Ok(data.claims);
        }

        let keys = self.keys.read().expect("key cache poisoned");
        let mut last_err = None;
        for key in keys.iter() {
            match decode::<Claims>(token, key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_err = Some(e),
            }
        }
        Err(DssError::Unauthenticated(match last_err {
            Some(e) => format!("invalid access token: {e}"),
            None => "no verification keys loaded".to_string(),
        }))
    }
}

/// Spawn the periodic key refresher. Failures are logged and retried on
/// the next tick; the cache keeps serving the previous key set.
pub fn spawn_key_refresh(
    authorizer: std::sync::Arc<Authorizer>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // the startup load already happened
        loop {
            ticker.tick().await;
            if let Err(e) = authorizer.refresh_keys().await {
                warn!(error = %e, "key refresh failed; keeping previous keys");
            }
        }
    })
}
