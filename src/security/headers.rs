//! Defensive response headers.
//!
//! # Headers
//! - `X-Content-Type-Options: nosniff`
//! - `X-Frame-Options: DENY`
//! - `X-XSS-Protection: 0`
//! - `Referrer-Policy: strict-origin-when-cross-origin`
//! - `Permissions-Policy: camera=(), microphone=(), geolocation=()`
//!
//! Set on every response, including ones produced by inner stages.

use axum::http::{header, HeaderName, HeaderValue};

use crate::http::pipeline::{Handler, Stage};

static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

fn defaults() -> [(HeaderName, HeaderValue); 5] {
    [
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
        (
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ),
        (
            PERMISSIONS_POLICY.clone(),
            HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
        ),
    ]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeaders;

impl Stage for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |req| {
            let next = next.clone();
            async move {
                let mut response = next.call(req).await;
                let headers = response.headers_mut();
                for (name, value) in defaults() {
                    headers.insert(name, value);
                }
                response
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn sets_all_headers() {
        let handler = SecurityHeaders.wrap(Handler::new(|_req| async {
            (StatusCode::NOT_FOUND, [("x-frame-options", "SAMEORIGIN")]).into_response()
        }));

        let response = handler.call(Request::new(Body::empty())).await;
        let headers = response.headers();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-xss-protection"], "0");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(
            headers["permissions-policy"],
            "camera=(), microphone=(), geolocation=()"
        );
    }
}
