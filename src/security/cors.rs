//! Cross-origin resource sharing policy.
//!
//! Preflight (`OPTIONS`) requests are answered here with `204` and never
//! reach the handlers. Every other response gets the negotiated headers.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::config::CorsConfig;
use crate::http::pipeline::{Handler, Stage};

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Request-ID";
const MAX_AGE_SECS: &str = "86400";

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed: Arc<HashSet<String>>,
}

impl CorsPolicy {
    /// An empty list allows every origin.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Arc::new(origins.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(config.allowed_origins.iter().cloned())
    }

    fn allow_all(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Value for `Access-Control-Allow-Origin`, if the origin may call us.
    fn allow_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match origin {
            Some(origin) => {
                let allowed = self.allow_all()
                    || origin
                        .to_str()
                        .map(|o| self.allowed.contains(o))
                        .unwrap_or(false);
                allowed.then(|| origin.clone())
            }
            None if self.allow_all() => Some(HeaderValue::from_static("*")),
            None => None,
        }
    }

    fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if let Some(value) = self.allow_origin(origin) {
            if value != "*" {
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
            }
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(MAX_AGE_SECS),
        );
    }
}

impl Stage for CorsPolicy {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let policy = self.clone();
        Handler::new(move |req| -> BoxFuture<'static, Response> {
            let origin = req.headers().get(header::ORIGIN).cloned();

            if req.method() == Method::OPTIONS {
                let mut response = StatusCode::NO_CONTENT.into_response();
                policy.apply(origin.as_ref(), response.headers_mut());
                return std::future::ready(response).boxed();
            }

            let policy = policy.clone();
            let downstream = next.call(req);
            async move {
                let mut response = downstream.await;
                policy.apply(origin.as_ref(), response.headers_mut());
                response
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_terminal(hits: Arc<AtomicUsize>) -> Handler {
        Handler::new(move |_req| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "ok".into_response()
            }
        })
    }

    fn request(method: Method, origin: Option<&'static str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/api/products");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_empty_204() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = CorsPolicy::new(Vec::<String>::new()).wrap(counting_terminal(hits.clone()));

        let response = handler
            .call(request(Method::OPTIONS, Some("https://shop.example")))
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers().clone();
        assert_eq!(headers["access-control-allow-origin"], "https://shop.example");
        assert_eq!(headers["access-control-allow-methods"], ALLOW_METHODS);
        assert_eq!(headers["access-control-allow-headers"], ALLOW_HEADERS);
        assert_eq!(headers["access-control-max-age"], "86400");
        assert!(to_bytes(response.into_body(), usize::MAX).await.unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allow_list_filters_origins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = CorsPolicy::new(["https://shop.example"]).wrap(counting_terminal(hits.clone()));

        let allowed = handler.call(request(Method::GET, Some("https://shop.example"))).await;
        assert_eq!(allowed.headers()["access-control-allow-origin"], "https://shop.example");
        assert_eq!(allowed.headers()["vary"], "Origin");

        let denied = handler.call(request(Method::GET, Some("https://evil.example"))).await;
        assert!(denied.headers().get("access-control-allow-origin").is_none());
        assert_eq!(denied.status(), StatusCode::OK);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn open_policy_without_origin_uses_wildcard() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = CorsPolicy::new(Vec::<String>::new()).wrap(counting_terminal(hits));

        let response = handler.call(request(Method::GET, None)).await;
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().get("vary").is_none());
    }
}
