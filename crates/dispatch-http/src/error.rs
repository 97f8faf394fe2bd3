use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_common::DispatchError;
use serde_json::json;

/// Translates the taxonomy in spec.md §7 to HTTP status codes, the axum
/// counterpart of the teacher's `impl actix_web::error::ResponseError for
/// ApiError`.
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            DispatchError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            DispatchError::Authorization(msg) => (StatusCode::FORBIDDEN, "unauthorized", msg.clone()),
            DispatchError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            DispatchError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            DispatchError::UpstreamUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", msg.clone())
            }
            DispatchError::Unrecoverable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "unrecoverable", msg.clone()),
            DispatchError::Fatal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "fatal", msg.clone()),
            DispatchError::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", err.to_string()),
            DispatchError::EventLog(err) => (StatusCode::INTERNAL_SERVER_ERROR, "event_log_error", err.to_string()),
        };
        if status.is_server_error() {
            tracing::error!(%status, %message, "request failed");
        }
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
