//! Failure taxonomy and the single error funnel.
//!
//! Handlers and middleware never write error bodies. They return an
//! [`AppError`], whose `IntoResponse` impl only parks the error in the response
//! extensions. [`error_funnel`] sits above routing, picks the parked error up,
//! classifies it and writes the one failure envelope for the request.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{OriginalUri, Request, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::Environment;
use crate::ratelimit::RateLimitError;
use crate::response::Envelope;
use crate::store::StoreError;

// ─── Error type ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// Raised on purpose with an explicit status (not found, conflict, …).
    #[error("{message}")]
    Api { status: StatusCode, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Anything unexpected, including handler panics.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

/// Carrier for a raised error between the raising layer and the funnel.
#[derive(Debug, Clone)]
pub struct RaisedError(Arc<AppError>);

impl RaisedError {
    pub fn error(&self) -> &AppError {
        &self.0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(RaisedError(Arc::new(self)));
        response
    }
}

// ─── Classifier ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub status: StatusCode,
    pub message: String,
}

/// Maps a failure to the status and message the client sees.
pub fn classify(err: &AppError) -> Classified {
    let mut status = StatusCode::INTERNAL_SERVER_ERROR;
    let mut message = String::from("Internal Server Error");

    match err {
        AppError::Api {
            status: explicit,
            message: text,
        } => {
            status = *explicit;
            message.clone_from(text);
        }
        AppError::Store(StoreError::Duplicate { field }) => {
            status = StatusCode::BAD_REQUEST;
            message = format!("{} already exists", capitalize(field));
        }
        AppError::Store(StoreError::Validation(violations)) => {
            status = StatusCode::BAD_REQUEST;
            message = violations
                .iter()
                .map(|v| v.message.as_str())
                .collect::<Vec<_>>()
                .join(", ");
        }
        AppError::Store(StoreError::InvalidId { path, value }) => {
            status = StatusCode::BAD_REQUEST;
            message = format!("Invalid {path}: {value}");
        }
        AppError::Store(_) | AppError::RateLimit(_) | AppError::Internal(_) => {}
    }

    Classified { status, message }
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Debug rendering of the error plus its `source()` chain; this is what
/// development responses expose as `stack`.
pub fn detail(err: &AppError) -> String {
    let mut out = format!("{err:?}");
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n    caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

// ─── Funnel ──────────────────────────────────────────────────────

/// Last link before routing: converts any raised error into an envelope.
pub async fn error_funnel(State(environment): State<Environment>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let raised = match response.extensions().get::<RaisedError>() {
        Some(raised) => raised.clone(),
        // Inner services (method routing, the docs wildcard) answer with an
        // empty body; give those an envelope too.
        None if !response.headers().contains_key(header::CONTENT_TYPE) => match response.status() {
            StatusCode::METHOD_NOT_ALLOWED => RaisedError(Arc::new(AppError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("Method {method} not allowed on {}", uri.path()),
            ))),
            StatusCode::NOT_FOUND => RaisedError(Arc::new(route_not_found(&uri))),
            _ => return response,
        },
        None => return response,
    };

    render(raised.error(), environment, &method, uri.path(), response)
}

fn render(err: &AppError, environment: Environment, method: &Method, path: &str, response: Response) -> Response {
    let Classified { status, message } = classify(err);

    let stack = if environment.is_production() {
        None
    } else {
        let stack = detail(err);
        tracing::error!(
            error = %err,
            stack = %stack,
            status = status.as_u16(),
            path,
            method = %method,
            "request failed"
        );
        Some(stack)
    };

    let envelope = Envelope::failure(message, stack);
    let bytes = match serde_json::to_vec(&envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize error envelope");
            br#"{"success":false,"message":"Internal Server Error","error":{"message":"Internal Server Error"}}"#
                .to_vec()
        }
    };

    // Keep headers set upstream (rate-limit, CORS); replace status and body.
    let (mut parts, _) = response.into_parts();
    parts.extensions.remove::<RaisedError>();
    parts.status = status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Response::from_parts(parts, Body::from(bytes))
}

// ─── Unmatched routes and panics ─────────────────────────────────

/// Router fallback. Raises; the funnel writes the 404.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    route_not_found(&uri)
}

fn route_not_found(uri: &Uri) -> AppError {
    AppError::not_found(format!("Route {uri} not found"))
}

/// `CatchPanicLayer` hook: turns a handler panic into a raised 500.
pub fn panic_to_error(panic: Box<dyn Any + Send + 'static>) -> Response {
    let reason = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "unknown panic payload".to_owned()
    };
    tracing::error!(%reason, "handler panicked");
    AppError::Internal(format!("handler panicked: {reason}")).into_response()
}
