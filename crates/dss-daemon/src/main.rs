//! dss-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, connects the
//! store (refusing to serve on a schema-major mismatch), builds the shared
//! state, wires middleware, and runs the server until SIGINT/SIGTERM
//! drains it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dss_auth::{spawn_key_refresh, Authorizer, KeySource};
use dss_config::DssConfig;
use dss_core::Service;
use dss_daemon::{build_router, state::AppState};
use dss_geo::CoverConfig;
use dss_store::{PgStore, StoreConfig};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file
    // does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");
    let cfg = loaded.config;

    let store = connect_store(&cfg).await?;

    // Schema gate: a mismatched major means this binary must not serve.
    let schema_version = store
        .check_schema()
        .await
        .context("schema version check failed; refusing to serve")?;
    info!(schema_version = %schema_version, "database schema accepted");

    let auth = Arc::new(
        Authorizer::new(key_source(&cfg), cfg.auth.accepted_audiences.clone())
            .await
            .context("authorizer bootstrap failed")?,
    );
    spawn_key_refresh(
        Arc::clone(&auth),
        Duration::from_secs(cfg.auth.key_refresh_timeout_secs),
    );

    let service = Service::new(
        store,
        CoverConfig {
            max_area_km2: cfg.geo.max_area_km2,
            ..CoverConfig::default()
        },
    );
    let shared = Arc::new(
        AppState::new(service, auth)
            .with_obfuscation(cfg.obfuscate_internal_errors)
            .with_scd(cfg.enable_scd),
    );
    if cfg.enable_scd {
        info!("strategic conflict detection surface enabled");
    }

    let app = build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(
            cfg.server.default_timeout_secs,
        )));

    let listener = tokio::net::TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.listen_addr))?;
    info!("dss-daemon listening on http://{}", cfg.server.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("shutting down gracefully");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Config file layering comes from DSS_CONFIG_FILES (comma-separated,
/// later files override earlier ones). No files means built-in defaults.
fn load_config() -> anyhow::Result<dss_config::LoadedConfig> {
    let files = std::env::var("DSS_CONFIG_FILES").unwrap_or_default();
    let paths: Vec<&str> = files.split(',').filter(|s| !s.is_empty()).collect();
    dss_config::load_layered_yaml(&paths)
}

async fn connect_store(cfg: &DssConfig) -> anyhow::Result<PgStore> {
    let ovn_secret = match &cfg.ovn_secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("no ovn_secret configured; using an insecure development default");
            "insecure-dev-secret".to_string()
        }
    };

    let store = PgStore::connect(
        &cfg.database.url(),
        cfg.database.max_open_conns,
        Duration::from_secs(cfg.database.max_conn_idle_seconds),
        StoreConfig {
            ovn_secret,
            locality: cfg.locality.clone(),
            cover: CoverConfig {
                max_area_km2: cfg.geo.max_area_km2,
                ..CoverConfig::default()
            },
        },
    )
    .await
    .context("connecting to the datastore")?;

    // Dev convenience only; production schemas are managed by the
    // migration tooling.
    if std::env::var("DSS_MIGRATE").as_deref() == Ok("1") {
        warn!("DSS_MIGRATE=1: running embedded migrations");
        store.migrate().await.context("running migrations")?;
    }

    Ok(store)
}

fn key_source(cfg: &DssConfig) -> KeySource {
    if !cfg.auth.public_key_files.is_empty() {
        return KeySource::Files(cfg.auth.public_key_files.clone());
    }
    if let Some(endpoint) = &cfg.auth.jwks_endpoint {
        return KeySource::Jwks {
            endpoint: endpoint.clone(),
            key_ids: cfg.auth.jwks_key_ids.clone(),
        };
    }
    KeySource::Insecure
}

/// Resolve on SIGINT or SIGTERM; axum then stops accepting and drains
/// in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
