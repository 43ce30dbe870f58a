pub mod health;
pub mod users;

use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    Form, Json,
};
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::response::ApiResponse;
use crate::AppState;

// ─── Extractors ──────────────────────────────────────────────────

/// Request body accepted as JSON or as an urlencoded form.
///
/// A request without a body, or whose content type is neither, reads as an
/// empty object so that field validation decides the outcome. Body
/// rejections are raised as [`AppError`] so they reach the error funnel.
#[derive(Debug)]
pub struct Payload<T>(pub T);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Absent,
}

impl BodyKind {
    fn of(headers: &HeaderMap) -> Self {
        let essence = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());

        match essence.as_deref() {
            Some("application/x-www-form-urlencoded") => Self::Form,
            Some(ct) if ct == "application/json" || ct.ends_with("+json") => Self::Json,
            _ => Self::Absent,
        }
    }
}

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match BodyKind::of(req.headers()) {
            BodyKind::Form => {
                let Form(value) = Form::<T>::from_request(req, state)
                    .await
                    .map_err(|r| body_error(r.status(), r.body_text()))?;
                Ok(Self(value))
            }
            BodyKind::Json => {
                let bytes = Bytes::from_request(req, state)
                    .await
                    .map_err(|r| body_error(r.status(), r.body_text()))?;
                if bytes.is_empty() {
                    return empty_object();
                }
                let Json(value) = Json::<T>::from_bytes(&bytes).map_err(|r| body_error(r.status(), r.body_text()))?;
                Ok(Self(value))
            }
            BodyKind::Absent => empty_object(),
        }
    }
}

fn empty_object<T: DeserializeOwned>() -> Result<Payload<T>, AppError> {
    serde_json::from_value(serde_json::Value::Object(serde_json::Map::new()))
        .map(Payload)
        .map_err(|e| AppError::bad_request(e.to_string()))
}

/// Oversized bodies keep their 413; every other parse failure is a 400.
fn body_error(status: StatusCode, text: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, text)
    } else {
        AppError::bad_request(text)
    }
}

/// The `:id` path segment, raw. Format checks happen at the store boundary.
#[derive(Debug)]
pub struct IdParam(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for IdParam
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        Ok(Self(id))
    }
}

// ─── GET / ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct Welcome {
    /// Absolute URL of the Swagger UI.
    pub documentation: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/",
    tag = "General",
    responses((status = 200, description = "Service banner", body = crate::docs::WelcomeResponse))
)]
pub async fn welcome(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResponse<Welcome> {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("localhost:{}", state.config.port));

    ApiResponse::success(
        Welcome {
            documentation: format!("{scheme}://{host}/api-docs"),
            version: state.config.api_version.clone(),
        },
        "Welcome to the Users API",
    )
}
