//! HTTP surface of the DSS.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. All handlers are `pub(crate)` so the
//! scenario tests in `tests/` can compose the router directly.

pub mod api_types;
pub mod error_map;
pub mod routes_rid;
pub mod routes_scd;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use dss_store::Store;

use crate::state::AppState;

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing, timeout) are **not** applied here;
/// `main.rs` attaches them after this call so tests can use the bare
/// router.
pub fn build_router<S: Store>(state: Arc<AppState<S>>) -> Router {
    let mut router = Router::new()
        // remote ID
        .route(
            "/rid/v1/dss/identification_service_areas",
            get(routes_rid::search_isas::<S>),
        )
        .route(
            "/rid/v1/dss/identification_service_areas/:id",
            get(routes_rid::get_isa::<S>).put(routes_rid::create_isa::<S>),
        )
        .route(
            "/rid/v1/dss/identification_service_areas/:id/:version",
            axum::routing::put(routes_rid::update_isa::<S>).delete(routes_rid::delete_isa::<S>),
        )
        .route(
            "/rid/v1/dss/subscriptions",
            get(routes_rid::search_subscriptions::<S>),
        )
        .route(
            "/rid/v1/dss/subscriptions/:id",
            get(routes_rid::get_subscription::<S>).put(routes_rid::create_subscription::<S>),
        )
        .route(
            "/rid/v1/dss/subscriptions/:id/:version",
            axum::routing::put(routes_rid::update_subscription::<S>)
                .delete(routes_rid::delete_subscription::<S>),
        );

    if state.enable_scd {
        router = router
            // strategic conflict detection
            .route(
                "/scd/dss/v1/operational_intent_references/query",
                post(routes_scd::query_intents::<S>),
            )
            .route(
                "/scd/dss/v1/operational_intent_references/:entityid",
                get(routes_scd::get_intent::<S>).put(routes_scd::create_intent::<S>),
            )
            .route(
                "/scd/dss/v1/operational_intent_references/:entityid/:ovn",
                axum::routing::put(routes_scd::update_intent::<S>)
                    .delete(routes_scd::delete_intent::<S>),
            )
            .route(
                "/scd/dss/v1/constraint_references/query",
                post(routes_scd::query_constraints::<S>),
            )
            .route(
                "/scd/dss/v1/constraint_references/:entityid",
                get(routes_scd::get_constraint::<S>).put(routes_scd::create_constraint::<S>),
            )
            .route(
                "/scd/dss/v1/constraint_references/:entityid/:ovn",
                axum::routing::put(routes_scd::update_constraint::<S>)
                    .delete(routes_scd::delete_constraint::<S>),
            )
            .route(
                "/scd/dss/v1/subscriptions/query",
                post(routes_scd::query_subscriptions::<S>),
            )
            .route(
                "/scd/dss/v1/subscriptions/:subscriptionid",
                get(routes_scd::get_subscription::<S>).put(routes_scd::create_subscription::<S>),
            )
            .route(
                "/scd/dss/v1/subscriptions/:subscriptionid/:version",
                axum::routing::put(routes_scd::update_subscription::<S>)
                    .delete(routes_scd::delete_subscription::<S>),
            )
            .route(
                "/scd/dss/v1/uss_availability/:uss_id",
                get(routes_scd::get_availability::<S>).put(routes_scd::set_availability::<S>),
            )
            .route("/scd/dss/v1/reports", post(routes_scd::make_report::<S>));
    }

    router.with_state(state)
}
