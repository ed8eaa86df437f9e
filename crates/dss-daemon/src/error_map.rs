//! Error taxonomy → HTTP mapping.
//!
//! `MissingOvns` is the one error with a structured body (the airspace
//! conflict response); everything else maps to `{ "message": … }`.
//! Internal errors are logged in full and, when obfuscation is on,
//! replaced with a constant string on the wire.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dss_models::{ConflictingEntity, DssError};
use serde::Serialize;
use tracing::error;

const OBFUSCATED_INTERNAL: &str = "Internal Server Error";

#[derive(Debug)]
pub struct ApiError {
    err: DssError,
    obfuscate: bool,
}

impl ApiError {
    pub fn new(err: DssError, obfuscate: bool) -> ApiError {
        ApiError { err, obfuscate }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

/// 409 body for an operational-intent write missing conflicting OVNs.
#[derive(Serialize)]
struct AirspaceConflictResponse {
    message: String,
    missing_operational_intents: Vec<ConflictingEntity>,
    missing_constraints: Vec<ConflictingEntity>,
}

pub fn status_for(err: &DssError) -> StatusCode {
    match err {
        DssError::BadRequest(_) => StatusCode::BAD_REQUEST,
        DssError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        DssError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        DssError::NotFound(_) => StatusCode::NOT_FOUND,
        DssError::AlreadyExists(_)
        | DssError::VersionMismatch(_)
        | DssError::MissingOvns(_)
        | DssError::TransientConflict => StatusCode::CONFLICT,
        DssError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        DssError::AreaTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        DssError::Exhausted(_) => StatusCode::TOO_MANY_REQUESTS,
        DssError::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
        DssError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.err);

        if let DssError::MissingOvns(conflicts) = self.err {
            let (intents, constraints): (Vec<_>, Vec<_>) = conflicts
                .into_iter()
                .partition(|c| matches!(c.kind, dss_models::EntityKind::OperationalIntent));
            let body = AirspaceConflictResponse {
                message: "at least one current OVN of a conflicting entity was not provided"
                    .to_string(),
                missing_operational_intents: intents,
                missing_constraints: constraints,
            };
            return (status, Json(body)).into_response();
        }

        let message = if self.err.is_internal() {
            error!(error = %self.err, "internal error");
            if self.obfuscate {
                OBFUSCATED_INTERNAL.to_string()
            } else {
                self.err.to_string()
            }
        } else {
            self.err.to_string()
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}
