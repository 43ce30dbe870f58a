//! OpenAPI document and Swagger UI, served under `/api-docs`.

use axum::Router;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::handlers::{self, health::Health, Welcome};
use crate::response::ErrorBody;
use crate::store::User;

pub const DOCS_PATH: &str = "/api-docs";
const SPEC_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Users API",
        description = "CRUD service for users with a uniform JSON envelope"
    ),
    paths(
        handlers::welcome,
        handlers::health::health_check,
        handlers::users::get_users,
        handlers::users::get_user_by_id,
        handlers::users::create_user,
        handlers::users::update_user,
        handlers::users::delete_user,
    ),
    components(schemas(User, ErrorBody)),
    tags(
        (name = "Users", description = "User management"),
        (name = "Health", description = "Liveness"),
        (name = "General", description = "Service banner"),
    )
)]
pub struct ApiDoc;

/// The document with `info.version` taken from `API_VERSION`.
pub fn openapi(config: &Config) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.version.clone_from(&config.api_version);
    doc
}

/// Swagger UI plus the raw document. Mounted outside the rate-limited group.
pub fn routes<S>(config: &Config) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    SwaggerUi::new(DOCS_PATH).url(SPEC_PATH, openapi(config)).into()
}

// ─── Envelope schemas ────────────────────────────────────────────
// Documentation-only shapes of `response::Envelope` per endpoint.

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UserResponse {
    #[schema(example = true)]
    success: bool,
    #[schema(example = "User retrieved successfully")]
    message: String,
    data: User,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UserListResponse {
    #[schema(example = true)]
    success: bool,
    #[schema(example = "Users retrieved successfully")]
    message: String,
    data: Vec<User>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct EmptyResponse {
    #[schema(example = true)]
    success: bool,
    #[schema(example = "User deleted successfully")]
    message: String,
    /// Always `null`.
    data: Option<serde_json::Value>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ErrorResponse {
    #[schema(example = false)]
    success: bool,
    #[schema(example = "User not found")]
    message: String,
    error: ErrorBody,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthResponse {
    #[schema(example = true)]
    success: bool,
    #[schema(example = "API is healthy")]
    message: String,
    data: Health,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct WelcomeResponse {
    #[schema(example = true)]
    success: bool,
    message: String,
    data: Welcome,
}
