//! End-to-end pipeline behavior over a real socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use reqwest::StatusCode;
use serde_json::Value;

use storehub::http::Handler;

mod common;

#[tokio::test]
async fn panicking_handler_returns_500_and_server_keeps_serving() {
    let server = common::spawn_with(common::local_config(), common::scripted_terminal()).await;
    let client = common::client();

    let res = client.get(server.url("/panic")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "internal server error");

    for _ in 0..3 {
        let res = client.get(server.url("/fine")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "ok");
    }

    assert!(server.stop().await.unwrap().is_clean());
}

#[tokio::test]
async fn preflight_is_answered_without_reaching_handlers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let terminal = Handler::new(move |_req: Request<Body>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Response::new(Body::from("ok"))
        }
    });

    let mut config = common::local_config();
    config.cors.allowed_origins = vec!["https://shop.example".into()];
    let server = common::spawn_with(config, terminal).await;
    let client = common::client();

    let res = client
        .request(reqwest::Method::OPTIONS, server.url("/api/products"))
        .header("origin", "https://shop.example")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let headers = res.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "https://shop.example"
    );
    assert!(headers["access-control-allow-methods"]
        .to_str()
        .unwrap()
        .contains("DELETE"));
    assert_eq!(res.text().await.unwrap(), "");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let res = client
        .get(server.url("/api/products"))
        .header("origin", "https://evil.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!res.headers().contains_key("access-control-allow-origin"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn responses_carry_identity_and_security_headers() {
    let server = common::spawn_with(common::local_config(), common::scripted_terminal()).await;
    let client = common::client();

    let res = client
        .get(server.url("/anything"))
        .header("x-request-id", "trace-abc-123")
        .send()
        .await
        .unwrap();
    let headers = res.headers();
    assert_eq!(headers["x-request-id"], "trace-abc-123");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("referrer-policy"));

    let res = client.get(server.url("/anything")).send().await.unwrap();
    let generated = res.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(generated.len(), 32);
    assert!(generated.chars().all(|c| c.is_ascii_hexdigit()));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_requests_still_get_headers() {
    let mut config = common::local_config();
    config.rate_limit.burst_size = 1;
    config.rate_limit.requests_per_second = 0.01;
    let server = common::spawn_with(config, common::scripted_terminal()).await;
    let client = common::client();

    assert_eq!(
        client.get(server.url("/a")).send().await.unwrap().status(),
        StatusCode::OK
    );

    let res = client.get(server.url("/a")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "1");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn forwarded_clients_have_separate_buckets() {
    let mut config = common::local_config();
    config.rate_limit.burst_size = 2;
    config.rate_limit.requests_per_second = 0.01;
    let server = common::spawn_with(config, common::scripted_terminal()).await;
    let client = common::client();

    let send = |ip: &'static str| {
        client
            .get(server.url("/a"))
            .header("x-forwarded-for", format!("{ip}, 10.0.0.1"))
            .send()
    };

    assert_eq!(send("203.0.113.7").await.unwrap().status(), StatusCode::OK);
    assert_eq!(send("203.0.113.7").await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        send("203.0.113.7").await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send("198.51.100.2").await.unwrap().status(), StatusCode::OK);

    server.stop().await.unwrap();
}
