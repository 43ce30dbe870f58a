use std::time::{Duration, Instant};

use axum::{
    body::HttpBody,
    extract::{Request, State},
    http::{header, HeaderMap, Method, Uri, Version},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};

use super::client::ClientIdentity;
use crate::config::Environment;

/// Probe endpoint kept out of production access logs.
const HEALTH_PATH: &str = "/health";

/// One access-log event per request, target `access`.
///
/// Development: `GET /users 200 0.412 ms - 87`
/// Production:  combined log format.
pub async fn access_log(
    State(environment): State<Environment>,
    client: ClientIdentity,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();
    let referrer = header_or_dash(req.headers(), header::REFERER);
    let user_agent = header_or_dash(req.headers(), header::USER_AGENT);

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed();

    if environment.is_production() && uri.path() == HEALTH_PATH {
        return response;
    }

    let status = response.status().as_u16();
    let size = response_size(&response);
    let line = if environment.is_production() {
        combined_line(&CombinedFields {
            remote_addr: client.as_str(),
            time: Utc::now(),
            method: &method,
            uri: &uri,
            version,
            status,
            size: size.as_deref(),
            referrer: &referrer,
            user_agent: &user_agent,
        })
    } else {
        dev_line(&method, &uri, status, elapsed, size.as_deref())
    };

    tracing::info!(target: "access", "{line}");
    response
}

fn header_or_dash(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_owned()
}

fn response_size(response: &Response) -> Option<String> {
    if let Some(len) = response.headers().get(header::CONTENT_LENGTH) {
        return len.to_str().ok().map(str::to_owned);
    }
    response.body().size_hint().exact().map(|n| n.to_string())
}

fn dev_line(method: &Method, uri: &Uri, status: u16, elapsed: Duration, size: Option<&str>) -> String {
    format!(
        "{method} {uri} {status} {:.3} ms - {}",
        elapsed.as_secs_f64() * 1000.0,
        size.unwrap_or("-"),
    )
}

struct CombinedFields<'a> {
    remote_addr: &'a str,
    time: DateTime<Utc>,
    method: &'a Method,
    uri: &'a Uri,
    version: Version,
    status: u16,
    size: Option<&'a str>,
    referrer: &'a str,
    user_agent: &'a str,
}

fn combined_line(f: &CombinedFields<'_>) -> String {
    format!(
        r#"{} - - [{}] "{} {} {:?}" {} {} "{}" "{}""#,
        f.remote_addr,
        f.time.format("%d/%b/%Y:%H:%M:%S %z"),
        f.method,
        f.uri,
        f.version,
        f.status,
        f.size.unwrap_or("-"),
        f.referrer,
        f.user_agent,
    )
}
