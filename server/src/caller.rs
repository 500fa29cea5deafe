//! Identifies the caller for rate limiting.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;

/// The caller's network address as the service sees it.
///
/// Taken from the first `X-Forwarded-For` entry when a proxy set one, else
/// the socket peer, else `"unknown"`. The header is client-controlled unless
/// a trusted proxy overwrites it, so this is a throttling key, not an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerAddress(pub String);

pub(crate) const UNKNOWN_CALLER: &str = "unknown";

impl CallerAddress {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_parts(parts: &Parts) -> Self {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return Self(addr.to_owned());
        }
        match parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(peer)) => Self(peer.ip().to_string()),
            None => Self(UNKNOWN_CALLER.to_owned()),
        }
    }
}

impl<S> FromRequestParts<S> for CallerAddress
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}
