//! Configuration for the DSS daemon.
//!
//! YAML files are deep-merged in order (later files override earlier
//! ones), canonicalized and hashed so a running process can report the
//! exact configuration content it booted with. `DSS_DATABASE_URL` in the
//! environment overrides the assembled database URL for dev setups.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub const ENV_DB_URL: &str = "DSS_DATABASE_URL";

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files layer by layer. An empty path list
/// yields the built-in defaults.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        merge_layer(&mut merged, json_val);
    }

    let mut canonical = String::new();
    write_canonical(&merged, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let config: DssConfig =
        serde_json::from_value(merged).context("config does not match the expected shape")?;

    Ok(LoadedConfig {
        config,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DssConfig,
    pub canonical_json: String,
    pub config_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DssConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    /// Self-identification string written into entities' `writer` column.
    #[serde(default)]
    pub locality: Option<String>,
    /// Enables the strategic conflict detection surface.
    #[serde(default = "default_true")]
    pub enable_scd: bool,
    /// Replace internal error messages with a constant string on the wire.
    #[serde(default = "default_true")]
    pub obfuscate_internal_errors: bool,
    /// Per-process secret folded into OVN derivation.
    #[serde(default)]
    pub ovn_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    /// `disable`, or any libpq sslmode; non-disable modes need `ssl_dir`.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    /// Directory with ca.crt, client.<user>.crt, client.<user>.key.
    #[serde(default)]
    pub ssl_dir: Option<String>,
    #[serde(default = "default_app_name")]
    pub application_name: String,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_conn_idle_seconds")]
    pub max_conn_idle_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default())).expect("defaults are valid")
    }
}

impl DatabaseConfig {
    /// Assemble the connection URL, unless `DSS_DATABASE_URL` overrides it.
    pub fn url(&self) -> String {
        if let Ok(url) = std::env::var(ENV_DB_URL) {
            return url;
        }
        let base = format!(
            "postgresql://{}@{}:{}/{}?application_name={}",
            self.user, self.host, self.port, self.database, self.application_name
        );
        match (self.ssl_mode.as_str(), &self.ssl_dir) {
            ("disable", _) | (_, None) => format!("{base}&sslmode={}", self.ssl_mode),
            (mode, Some(dir)) => format!(
                "{base}&sslmode={mode}&sslrootcert={dir}/ca.crt&sslcert={dir}/client.{user}.crt&sslkey={dir}/client.{user}.key",
                user = self.user
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Per-request deadline, seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Drain window for graceful shutdown, seconds.
    #[serde(default = "default_timeout_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default())).expect("defaults are valid")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// RSA public keys (PEM) for JWT verification.
    #[serde(default)]
    pub public_key_files: Vec<String>,
    /// JWKS endpoint, used when no key files are given.
    #[serde(default)]
    pub jwks_endpoint: Option<String>,
    /// `kid`s accepted from the JWKS document (all when empty).
    #[serde(default)]
    pub jwks_key_ids: Vec<String>,
    #[serde(default = "default_key_refresh_secs")]
    pub key_refresh_timeout_secs: u64,
    /// Acceptable `aud` claims; empty disables audience validation.
    #[serde(default)]
    pub accepted_audiences: Vec<String>,
}

// Default must route through serde so the field-level defaults apply; a
// derived impl would zero key_refresh_timeout_secs, and the key refresher's
// interval timer panics on a zero period.
impl Default for AuthConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default())).expect("defaults are valid")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoConfig {
    #[serde(default = "default_max_area_km2")]
    pub max_area_km2: f64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default())).expect("defaults are valid")
    }
}

fn default_true() -> bool {
    true
}
fn default_db_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_user() -> String {
    "postgres".to_string()
}
fn default_ssl_mode() -> String {
    "disable".to_string()
}
fn default_app_name() -> String {
    "dss".to_string()
}
fn default_db_name() -> String {
    "dss".to_string()
}
fn default_max_open_conns() -> u32 {
    20
}
fn default_max_conn_idle_seconds() -> u64 {
    30
}
fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_key_refresh_secs() -> u64 {
    60
}
fn default_max_area_km2() -> f64 {
    2500.0
}

/// Overlay one configuration layer onto the accumulated tree.
///
/// Maps merge key by key so a later file can override a single database
/// setting without restating the section. Everything else, arrays
/// included, is replaced wholesale: a later layer may *shrink* a list
/// (audiences, key files), which element-wise merging could not express.
fn merge_layer(base: &mut Value, overlay: Value) {
    let overlay_map = match overlay {
        Value::Object(map) if base.is_object() => map,
        other => {
            *base = other;
            return;
        }
    };
    let base_map = base.as_object_mut().expect("guarded by is_object above");

    for (key, value) in overlay_map {
        match base_map.entry(key) {
            serde_json::map::Entry::Vacant(slot) => {
                slot.insert(value);
            }
            serde_json::map::Entry::Occupied(mut slot) => merge_layer(slot.get_mut(), value),
        }
    }
}

/// Append `v` to `out` as canonical JSON: object keys sorted, compact
/// separators, scalars rendered by serde_json so string escaping and
/// number formatting stay standard. Walking the tree once avoids building
/// a second, sorted copy of the whole config just to hash it.
fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string serialization must not fail"),
                );
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(
            &serde_json::to_string(scalar).expect("scalar serialization must not fail"),
        ),
    }
}
