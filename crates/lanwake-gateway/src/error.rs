use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lanwake_core::LanWakeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] LanWakeError),
    #[error("Invalid request body: {0}")]
    BadBody(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Domain(LanWakeError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Domain(LanWakeError::Validation(_)) | ApiError::BadBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Domain(LanWakeError::SignalSend(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Domain(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("⚠️ API error ({status}): {self}");
        }
        (
            status,
            Json(serde_json::json!({ "ok": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection.body_text())
    }
}
