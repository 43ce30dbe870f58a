use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{request::Parts, Extensions},
    middleware::Next,
    response::Response,
};

const UNKNOWN: &str = "unknown";

/// Address a request is attributed to (peer IP). Keys rate-limit counters
/// and fills the remote-address slot of the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_extensions(extensions: &Extensions) -> Self {
        match extensions.get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Self(addr.ip().to_string()),
            None => Self(UNKNOWN.to_owned()),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stamps every request with its [`ClientIdentity`].
pub async fn attach_client_identity(mut req: Request, next: Next) -> Response {
    let identity = ClientIdentity::from_extensions(req.extensions());
    req.extensions_mut().insert(identity);
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .cloned()
            .unwrap_or_else(|| Self::from_extensions(&parts.extensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[tokio::test]
    async fn reads_peer_ip_from_connect_info() {
        let mut req = HttpRequest::new(());
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.7:54321".parse::<SocketAddr>().unwrap()));
        let (mut parts, ()) = req.into_parts();

        let identity = ClientIdentity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity.as_str(), "192.0.2.7");
    }

    #[tokio::test]
    async fn falls_back_to_unknown() {
        let (mut parts, ()) = HttpRequest::new(()).into_parts();
        let identity = ClientIdentity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity.to_string(), "unknown");
    }
}
