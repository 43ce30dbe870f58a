use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ─── Envelope ────────────────────────────────────────────────────

/// Uniform body for every API response.
///
/// A success envelope always has `data` (possibly `null`) and no `error`;
/// a failure envelope has `error` and no `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
    /// Failure detail chain; only present in development.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl<T> Envelope<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>, stack: Option<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(ErrorBody {
                message: message.clone(),
                stack,
            }),
            message,
            data: None,
        }
    }
}

// ─── Success writer ──────────────────────────────────────────────

/// A success envelope paired with its status code. Handlers return this;
/// failures go through [`crate::error::AppError`] instead.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    envelope: Envelope<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 with `data`.
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            envelope: Envelope::success(data, message),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope)).into_response()
    }
}
