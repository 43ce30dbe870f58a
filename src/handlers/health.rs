use std::sync::Arc;

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    #[schema(example = "OK")]
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the process started serving.
    #[schema(example = 123.456)]
    pub uptime: f64,
    #[schema(example = "development")]
    pub environment: &'static str,
}

/// Liveness probe. Exempt from rate limiting and, in production, from the
/// access log.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "API is healthy", body = crate::docs::HealthResponse))
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResponse<Health> {
    ApiResponse::success(
        Health {
            status: "OK",
            timestamp: Utc::now(),
            uptime: state.started.elapsed().as_secs_f64(),
            environment: state.config.environment.as_str(),
        },
        "API is healthy",
    )
}
