//! Per-request identity and context.
//!
//! # Responsibilities
//! - Resolve the request ID (caller-supplied `X-Request-ID` or generated)
//! - Carry the [`RequestContext`] through the pipeline in request extensions
//! - Derive the client key used to charge rate-limit budgets
//!
//! # Design Decisions
//! - Request ID assigned by the outermost stage so every log line carries it
//! - Generated IDs are 16 random bytes from the OS, hex-encoded
//! - Forwarding headers take priority over the peer address

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::Instrument;

use crate::http::pipeline::{Handler, Stage};
use crate::resilience::timeouts::{Deadline, DeadlineExceeded};

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const MAX_REQUEST_ID_LEN: usize = 128;

/// Opaque request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// 16 bytes from the OS RNG, hex-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let hex = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    /// Accept a caller-supplied ID if it is printable, non-empty and short.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        if value.is_empty() || value.len() > MAX_REQUEST_ID_LEN {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State attached to a request for its trip through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<RequestId>,
    pub deadline: Option<Deadline>,
}

impl RequestContext {
    /// Request ID for logging; `"-"` when none was assigned.
    pub fn request_id_str(&self) -> &str {
        self.request_id.as_ref().map_or("-", RequestId::as_str)
    }

    /// Run `fut` bounded by the request deadline, if one is set.
    pub async fn bound<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        match self.deadline {
            Some(deadline) => deadline.bound(fut).await,
            None => Ok(fut.await),
        }
    }
}

/// Access to the [`RequestContext`] stored in a request.
pub trait RequestContextExt {
    fn context(&self) -> Option<&RequestContext>;
    fn context_mut(&mut self) -> &mut RequestContext;

    fn request_id(&self) -> Option<&RequestId> {
        self.context().and_then(|ctx| ctx.request_id.as_ref())
    }
}

impl<B> RequestContextExt for Request<B> {
    fn context(&self) -> Option<&RequestContext> {
        self.extensions().get::<RequestContext>()
    }

    fn context_mut(&mut self) -> &mut RequestContext {
        self.extensions_mut().get_or_insert_default::<RequestContext>()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Derive the rate-limit key for a request.
///
/// Priority: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer IP.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header(&X_FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header(&X_REAL_IP) {
        return real_ip.to_string();
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Client key for a request, using the peer address from `ConnectInfo`.
pub fn client_key_of<B>(req: &Request<B>) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_key(req.headers(), peer)
}

/// Resolves the request ID, records it in the context, forwards it
/// downstream in the header and echoes it on the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdentity;

impl Stage for RequestIdentity {
    fn name(&self) -> &'static str {
        "request_identity"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |mut req| {
            let next = next.clone();
            async move {
                let id = req
                    .headers()
                    .get(&X_REQUEST_ID)
                    .and_then(RequestId::from_header)
                    .unwrap_or_else(RequestId::generate);
                let header = HeaderValue::from_str(id.as_str()).ok();

                if let Some(value) = &header {
                    req.headers_mut().insert(X_REQUEST_ID.clone(), value.clone());
                }
                req.context_mut().request_id = Some(id.clone());

                let span = tracing::info_span!("request", request_id = %id);
                let mut response = next.call(req).instrument(span).await;

                if let Some(value) = header {
                    response.headers_mut().insert(X_REQUEST_ID.clone(), value);
                }
                response
            }
        })
    }
}
