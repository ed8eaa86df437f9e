//! Strategic conflict detection endpoint handlers (`/scd/dss/v1/...`).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dss_auth::scopes;
use dss_core::constraint::PutConstraintParams;
use dss_core::operational_intent::{NewSubscriptionParams, PutIntentParams};
use dss_core::subscription::PutScdSubscriptionParams;
use dss_models::{AvailabilityStatus, DssError, IntentState, Ovn, Version};
use dss_store::Store;
use uuid::Uuid;

use crate::api_types::{
    availability_response, scd_subscribers, ChangeConstraintResponse, ChangeIntentResponse,
    ConstraintReference, GetConstraintResponse, GetIntentResponse, MakeReportResponse,
    OperationalIntentReference, PutConstraintRequest, PutIntentRequest,
    PutScdSubscriptionRequest, PutScdSubscriptionResponse, QueryConstraintsResponse,
    QueryIntentsResponse, QueryScdSubscriptionsResponse, QueryVolumeRequest, ScdSubscription,
    SetAvailabilityRequest, bearer_token,
};
use crate::error_map::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Operational intent references
// ---------------------------------------------------------------------------

pub(crate) async fn query_intents<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<QueryVolumeRequest>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::INTENT_ACCESS)
        .map_err(|e| st.api_err(e))?;
    let aoi = body
        .area_of_interest
        .try_into_volume()
        .map_err(|e| st.api_err(e))?;

    let ops = st
        .service
        .query_operational_intents(owner, aoi)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(QueryIntentsResponse {
        operational_intent_references: ops
            .iter()
            .map(OperationalIntentReference::from_model)
            .collect(),
    })
    .into_response())
}

pub(crate) async fn get_intent<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::INTENT_ACCESS)
        .map_err(|e| st.api_err(e))?;

    let op = st
        .service
        .get_operational_intent(owner, id)
        .await
        .map_err(|e| st.api_err(e))?;
    Ok(Json(GetIntentResponse {
        operational_intent_reference: OperationalIntentReference::from_model(&op),
    })
    .into_response())
}

pub(crate) async fn create_intent<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<PutIntentRequest>,
) -> Result<Response, ApiError> {
    put_intent(st, headers, id, None, body).await
}

pub(crate) async fn update_intent<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, ovn)): Path<(Uuid, String)>,
    Json(body): Json<PutIntentRequest>,
) -> Result<Response, ApiError> {
    put_intent(st, headers, id, Some(Ovn::new(ovn)), body).await
}

async fn put_intent<S: Store>(
    st: Arc<AppState<S>>,
    headers: HeaderMap,
    id: Uuid,
    path_ovn: Option<Ovn>,
    body: PutIntentRequest,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::INTENT_ACCESS)
        .map_err(|e| st.api_err(e))?;
    let creating = path_ovn.is_none();
    let params = intent_params(body).map_err(|e| st.api_err(e))?;

    let change = st
        .service
        .put_operational_intent(owner, id, path_ovn, params)
        .await
        .map_err(|e| st.api_err(e))?;

    let status = if creating {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ChangeIntentResponse {
            operational_intent_reference: OperationalIntentReference::from_model(&change.intent),
            subscribers: scd_subscribers(&change.subscribers),
        }),
    )
        .into_response())
}

fn intent_params(body: PutIntentRequest) -> Result<PutIntentParams, DssError> {
    let mut extents = Vec::with_capacity(body.extents.len());
    for extent in body.extents {
        extents.push(extent.try_into_volume()?);
    }
    Ok(PutIntentParams {
        extents,
        key: body.key.into_iter().map(Ovn::new).collect(),
        state: IntentState::parse(&body.state)?,
        base_url: body.uss_base_url,
        subscription_id: body.subscription_id,
        new_subscription: body.new_subscription.map(|n| NewSubscriptionParams {
            base_url: n.uss_base_url,
            notify_for_constraints: n.notify_for_constraints,
        }),
    })
}

pub(crate) async fn delete_intent<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, ovn)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::INTENT_ACCESS)
        .map_err(|e| st.api_err(e))?;

    let change = st
        .service
        .delete_operational_intent(owner, id, Ovn::new(ovn))
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(ChangeIntentResponse {
        operational_intent_reference: OperationalIntentReference::from_model(&change.intent),
        subscribers: scd_subscribers(&change.subscribers),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Constraint references
// ---------------------------------------------------------------------------

pub(crate) async fn query_constraints<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<QueryVolumeRequest>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::CONSTRAINT_READ)
        .map_err(|e| st.api_err(e))?;
    let aoi = body
        .area_of_interest
        .try_into_volume()
        .map_err(|e| st.api_err(e))?;

    let constraints = st
        .service
        .query_constraints(owner, aoi)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(QueryConstraintsResponse {
        constraint_references: constraints
            .iter()
            .map(ConstraintReference::from_model)
            .collect(),
    })
    .into_response())
}

pub(crate) async fn get_constraint<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::CONSTRAINT_READ)
        .map_err(|e| st.api_err(e))?;

    let constraint = st
        .service
        .get_constraint(owner, id)
        .await
        .map_err(|e| st.api_err(e))?;
    Ok(Json(GetConstraintResponse {
        constraint_reference: ConstraintReference::from_model(&constraint),
    })
    .into_response())
}

pub(crate) async fn create_constraint<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<PutConstraintRequest>,
) -> Result<Response, ApiError> {
    put_constraint(st, headers, id, None, body).await
}

pub(crate) async fn update_constraint<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, ovn)): Path<(Uuid, String)>,
    Json(body): Json<PutConstraintRequest>,
) -> Result<Response, ApiError> {
    put_constraint(st, headers, id, Some(Ovn::new(ovn)), body).await
}

async fn put_constraint<S: Store>(
    st: Arc<AppState<S>>,
    headers: HeaderMap,
    id: Uuid,
    path_ovn: Option<Ovn>,
    body: PutConstraintRequest,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::CONSTRAINT_WRITE)
        .map_err(|e| st.api_err(e))?;
    let creating = path_ovn.is_none();

    let mut extents = Vec::with_capacity(body.extents.len());
    for extent in body.extents {
        extents.push(extent.try_into_volume().map_err(|e| st.api_err(e))?);
    }

    let change = st
        .service
        .put_constraint(
            owner,
            id,
            path_ovn,
            PutConstraintParams {
                extents,
                base_url: body.uss_base_url,
            },
        )
        .await
        .map_err(|e| st.api_err(e))?;

    let status = if creating {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ChangeConstraintResponse {
            constraint_reference: ConstraintReference::from_model(&change.constraint),
            subscribers: scd_subscribers(&change.subscribers),
        }),
    )
        .into_response())
}

pub(crate) async fn delete_constraint<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, ovn)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::CONSTRAINT_WRITE)
        .map_err(|e| st.api_err(e))?;

    let change = st
        .service
        .delete_constraint(owner, id, Ovn::new(ovn))
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(ChangeConstraintResponse {
        constraint_reference: ConstraintReference::from_model(&change.constraint),
        subscribers: scd_subscribers(&change.subscribers),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub(crate) async fn query_subscriptions<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<QueryVolumeRequest>,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::SCD_SUBSCRIPTION_ACCESS)
        .map_err(|e| st.api_err(e))?;
    let aoi = body
        .area_of_interest
        .try_into_volume()
        .map_err(|e| st.api_err(e))?;

    let subs = st
        .service
        .query_subscriptions(owner, aoi)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(QueryScdSubscriptionsResponse {
        subscriptions: subs.iter().map(ScdSubscription::from_model).collect(),
    })
    .into_response())
}

pub(crate) async fn get_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::SCD_SUBSCRIPTION_ACCESS)
        .map_err(|e| st.api_err(e))?;

    let sub = st
        .service
        .get_subscription(id)
        .await
        .map_err(|e| st.api_err(e))?;
    Ok(Json(PutScdSubscriptionResponse {
        subscription: ScdSubscription::from_model(&sub),
    })
    .into_response())
}

pub(crate) async fn create_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<PutScdSubscriptionRequest>,
) -> Result<Response, ApiError> {
    put_subscription(st, headers, id, None, body).await
}

pub(crate) async fn update_subscription<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path((id, version)): Path<(Uuid, String)>,
    Json(body): Json<PutScdSubscriptionRequest>,
) -> Result<Response, ApiError> {
    let version = Version::parse(&version).map_err(|e| st.api_err(e))?;
    put_subscription(st, headers, id, Some(version), body).await
}

async fn put_subscription<S: Store>(
    st: Arc<AppState<S>>,
    headers: HeaderMap,
    id: Uuid,
    version: Option<Version>,
    body: PutScdSubscriptionRequest,
) -> Result<Response, ApiError> {
    let owner = st
        .auth
        .authorize(bearer_token(&headers), scopes::SCD_SUBSCRIPTION_ACCESS)
        .map_err(|e| st.api_err(e))?;
    let extents = body
        .extents
        .try_into_volume()
        .map_err(|e| st.api_err(e))?;

    let sub = st
        .service
        .put_scd_subscription(
            owner,
            id,
            version,
            PutScdSubscriptionParams {
                extents,
                base_url: body.uss_base_url,
                notify_for_operations: body.notify_for_operational_intents,
                notify_for_constraints: body.notify_for_constraints,
            },
        )
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(PutScdSubscriptionResponse {
        subscription: ScdSubscription::from_model(&sub),
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
        .authorize(bearer_token(&headers), scopes::SCD_SUBSCRIPTION_ACCESS)
        .map_err(|e| st.api_err(e))?;
    let version = Version::parse(&version).map_err(|e| st.api_err(e))?;

    let deleted = st
        .service
        .delete_subscription(owner, id, version)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok(Json(PutScdSubscriptionResponse {
        subscription: ScdSubscription::from_model(&deleted),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// USS availability
// ---------------------------------------------------------------------------

pub(crate) async fn get_availability<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(uss_id): Path<String>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::AVAILABILITY_READ)
        .map_err(|e| st.api_err(e))?;

    let availability = st
        .service
        .get_availability(uss_id)
        .await
        .map_err(|e| st.api_err(e))?;
    Ok(Json(availability_response(&availability)).into_response())
}

pub(crate) async fn set_availability<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(uss_id): Path<String>,
    Json(body): Json<SetAvailabilityRequest>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::AVAILABILITY_WRITE)
        .map_err(|e| st.api_err(e))?;
    let status = AvailabilityStatus::parse(&body.availability).map_err(|e| st.api_err(e))?;

    let updated = st
        .service
        .set_availability(uss_id, status, body.old_version)
        .await
        .map_err(|e| st.api_err(e))?;
    Ok(Json(availability_response(&updated)).into_response())
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

pub(crate) async fn make_report<S: Store>(
    State(st): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    st.auth
        .authorize(bearer_token(&headers), scopes::REPORT_ACCESS)
        .map_err(|e| st.api_err(e))?;

    let report = st
        .service
        .make_report(payload)
        .await
        .map_err(|e| st.api_err(e))?;

    Ok((
        StatusCode::CREATED,
        Json(MakeReportResponse {
            report_id: report.id,
        }),
    )
        .into_response())
}
