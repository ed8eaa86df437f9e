//! Remote-ID endpoint handlers (`/rid/v1/dss/...`).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dss_auth::scopes;
use dss_core::isa::PutIsaParams;
use dss_core::subscription::PutRidSubscriptionParams;
use dss_geo::parse_area;
use dss_models::{Owner, Version};
use dss_store::Store;
use uuid::Uuid;

use crate::api_types::{
    bearer_token, wire_subscribers, GetIsaResponse, GetRidSubscriptionResponse, PutIsaRequest,
    PutIsaResponse, PutRidSubscriptionRequest, PutRidSubscriptionResponse, RidIsa,
    RidSubscription, SearchAreaQuery, SearchIsasResponse, SearchRidSubscriptionsResponse,
};
use crate::error_map::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Identification service areas
// ---------------------------------------------------------------------------

pub(crate) async fn search_isas<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Query(q): Query<SearchAreaQuery>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::RID_READ)
        .map_err(|e| st.api_err(e))?;
    let polygon = parse_area(&q.area).map_err(|e| st.api_err(e.into()))?;

    let isas = st
        .service
        .search_isas(polygon, q.earliest_time, q.latest_time)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(SearchIsasResponse {
        service_areas: isas.iter().map(RidIsa::from_model).collect(),
    })
    .into_response())
}

pub(crate) async fn get_isa<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::RID_READ)
        .map_err(|e| st.api_err(e))?;

    let isa = st.service.get_isa(id).await.map_err(|e| st.api_err(e))?;
    Ok(Json(GetIsaResponse {
        service_area: RidIsa::from_model(&isa),
    })
    .into_response())
}

pub(crate) async fn create_isa<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<PutIsaRequest>,
) -> Result<Response, ApiError> {
    put_isa(st, headers, id, None, body).await
}

pub(crate) async fn update_isa<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, version)): Path<(Uuid, String)>,
    Json(body): Json<PutIsaRequest>,
) -> Result<Response, ApiError> {
    let version = Version::parse(&version).map_err(|e| st.api_err(e))?;
    put_isa(st, headers, id, Some(version), body).await
}

async fn put_isa<S: Store>(
    st: Arc<AppState<S>>,
    headers: HeaderMap,
    id: Uuid,
    version: Option<Version>,
    body: PutIsaRequest,
) -> Result<Response, ApiError> {
    let owner: Owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::RID_WRITE)
        .map_err(|e| st.api_err(e))?;

    let change = st
        .service
        .put_isa(
            owner,
            id,
            version,
            PutIsaParams {
                extents: body.extents.into_volume(),
                flights_url: body.flights_url,
            },
        )
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(PutIsaResponse {
        service_area: RidIsa::from_model(&change.isa),
        subscribers: wire_subscribers(&change.subscribers),
    })
    .into_response())
}

pub(crate) async fn delete_isa<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, version)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::RID_WRITE)
        .map_err(|e| st.api_err(e))?;
    let version = Version::parse(&version).map_err(|e| st.api_err(e))?;

    let change = st
        .service
        .delete_isa(owner, id, version)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(PutIsaResponse {
        service_area: RidIsa::from_model(&change.isa),
        subscribers: wire_subscribers(&change.subscribers),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub(crate) async fn search_subscriptions<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Query(q): Query<SearchAreaQuery>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::RID_READ)
        .map_err(|e| st.api_err(e))?;
    let polygon = parse_area(&q.area).map_err(|e| st.api_err(e.into()))?;

    let subs = st
        .service
        .search_subscriptions(owner, polygon)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(SearchRidSubscriptionsResponse {
        subscriptions: subs.iter().map(RidSubscription::from_model).collect(),
    })
    .into_response())
}

pub(crate) async fn get_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::RID_READ)
        .map_err(|e| st.api_err(e))?;

    let sub = st
        .service
        .get_subscription(id)
        .await
        .map_err(|e| st.api_err(e))?;
    Ok(Json(GetRidSubscriptionResponse {
        subscription: RidSubscription::from_model(&sub),
    })
    .into_response())
}

pub(crate) async fn create_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<PutRidSubscriptionRequest>,
) -> Result<Response, ApiError> {
    put_subscription(st, headers, id, None, body).await
}

pub(crate) async fn update_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, version)): Path<(Uuid, String)>,
    Json(body): Json<PutRidSubscriptionRequest>,
) -> Result<Response, ApiError> {
    let version = Version::parse(&version).map_err(|e| st.api_err(e))?;
    put_subscription(st, headers, id, Some(version), body).await
}

async fn put_subscription<S: Store>(
    st: Arc<AppState<S>>,
    headers: HeaderMap,
    id: Uuid,
    version: Option<Version>,
    body: PutRidSubscriptionRequest,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::RID_WRITE)
        .map_err(|e| st.api_err(e))?;

    let change = st
        .service
        .put_rid_subscription(
            owner,
            id,
            version,
            PutRidSubscriptionParams {
                extents: body.extents.into_volume(),
                url: body.callbacks.identification_service_area_url,
            },
        )
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(PutRidSubscriptionResponse {
        subscription: RidSubscription::from_model(&change.subscription),
        service_areas: change.service_areas.iter().map(RidIsa::from_model).collect(),
    })
    .into_response())
}

pub(crate) async fn delete_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, version)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::RID_WRITE)
        .map_err(|e| st.api_err(e))?;
    let version = Version::parse(&version).map_err(|e| st.api_err(e))?;

    let deleted = st
        .service
        .delete_subscription(owner, id, version)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(GetRidSubscriptionResponse {
        subscription: RidSubscription::from_model(&deleted),
    })
    .into_response())
}
