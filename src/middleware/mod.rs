pub mod access_log;
pub mod client;
pub mod security;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::Config;

/// Single configured origin with credentials. An origin that is not a valid
/// header value admits no cross-origin caller.
pub fn cors(config: &Config) -> CorsLayer {
    // A literal `*` cannot be combined with credentials; echo the caller instead.
    if config.cors_origin == "*" {
        return layer(AllowOrigin::mirror_request());
    }

    let origin = match HeaderValue::from_str(&config.cors_origin) {
        Ok(value) => AllowOrigin::exact(value),
        Err(e) => {
            tracing::warn!(origin = %config.cors_origin, error = %e, "invalid CORS_ORIGIN, cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    layer(origin)
}

fn layer(origin: AllowOrigin) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
