mod admin;
mod instances;

pub use admin::{Settings, SettingsResponse, get_settings_handler, update_settings_handler};
pub use instances::{
    InstanceRow, ListResponse, StartRequest, StartResponse, StopResponse,
    list_instances_handler, start_instance_handler, stop_instance_handler,
};

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

use crate::instances::LifecycleError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub reason: &'static str,
    pub code: u32,
}

#[derive(Serialize)]
pub struct ErrorResponseWithMessage {
    pub reason: &'static str,
    pub code: u32,
    pub message: String,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

/// Maps a lifecycle failure to its stable wire representation.
pub(crate) fn lifecycle_error_response(err: &LifecycleError) -> HttpResponse {
    let (status, reason, code) = match err {
        LifecycleError::InvalidChallenge(_) => {
            (StatusCode::BAD_REQUEST, "ERR_INVALID_CHALLENGE", 3)
        }
        LifecycleError::Conflict => (StatusCode::CONFLICT, "ERR_CONFLICT", 4),
        LifecycleError::QuotaExceeded { .. } => {
            (StatusCode::TOO_MANY_REQUESTS, "ERR_QUOTA_EXCEEDED", 5)
        }
        LifecycleError::NotFound(_) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND", 6),
        LifecycleError::Forbidden(_) => (StatusCode::FORBIDDEN, "ERR_FORBIDDEN", 7),
        LifecycleError::Pending(_) => (StatusCode::CONFLICT, "ERR_PENDING", 8),
        LifecycleError::ProvisionFailure(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_PROVISION_FAILED",
            9,
        ),
        LifecycleError::TeardownFailure(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_TEARDOWN_FAILED",
            10,
        ),
        LifecycleError::Inconsistent(..) | LifecycleError::Storage(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "ERR_INTERNAL", 11)
        }
    };

    if status.is_server_error() {
        log::error!("request failed: {err}");
    }

    HttpResponse::build(status).json(ErrorResponseWithMessage {
        reason,
        code,
        message: err.to_string(),
    })
}

pub(crate) fn internal_error_response() -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse {
        reason: "ERR_INTERNAL",
        code: 11,
    })
}

pub(crate) fn forbidden_response() -> HttpResponse {
    HttpResponse::Forbidden().json(ErrorResponse {
        reason: "ERR_FORBIDDEN",
        code: 7,
    })
}

/// Base URL clients should use to reach deployed instances, derived from
/// the (possibly forwarded) request host.
pub(crate) fn server_base_url(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let host = info.host().split(':').next().unwrap_or("localhost");
    format!("{}://{}", info.scheme(), host)
}
