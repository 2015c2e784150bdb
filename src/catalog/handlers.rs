//! Catalog routes: the terminal handler of the pipeline.
//!
//! Every store call is bound to the request deadline; an elapsed deadline
//! becomes `504`.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;

use crate::catalog::model::ProductInput;
use crate::catalog::store::{ProductStore, StoreError};
use crate::http::request::RequestContext;
use crate::http::response::{json_error, json_ok, DEADLINE_EXCEEDED_MESSAGE};
use crate::resilience::timeouts::DeadlineExceeded;

/// Page size used when the client sends no usable `limit`.
const DEFAULT_LIMIT: i64 = 10;

/// Errors a route can answer with.
#[derive(Debug)]
pub enum ApiError {
    InvalidId,
    InvalidJson,
    BodyTooLarge,
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<DeadlineExceeded> for ApiError {
    fn from(err: DeadlineExceeded) -> Self {
        ApiError::Store(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidId => json_error(StatusCode::BAD_REQUEST, "invalid product ID"),
            ApiError::InvalidJson => json_error(StatusCode::BAD_REQUEST, "invalid JSON payload"),
            ApiError::BodyTooLarge => {
                json_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
            }
            ApiError::Store(StoreError::NotFound(_)) => {
                json_error(StatusCode::NOT_FOUND, "product not found")
            }
            ApiError::Store(StoreError::Invalid(err)) => {
                json_error(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            ApiError::Store(StoreError::DeadlineExceeded(_)) => {
                tracing::warn!("Request deadline exceeded in handler");
                json_error(StatusCode::GATEWAY_TIMEOUT, DEADLINE_EXCEEDED_MESSAGE)
            }
        }
    }
}

type ApiResult = Result<Response, ApiError>;

/// Build the catalog router. Bodies over `max_body_size` bytes get `413`.
pub fn router(store: ProductStore, max_body_size: usize) -> Router {
    Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route(
            "/api/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/api/stats", get(stats))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(store)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size))
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim().parse().map_err(|_| ApiError::InvalidId)
}

fn parse_body(body: Result<Bytes, BytesRejection>) -> Result<ProductInput, ApiError> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::BodyTooLarge
        } else {
            ApiError::InvalidJson
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|_| ApiError::InvalidJson)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    search: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

/// Lenient integer parse: anything unparseable counts as zero.
fn lenient(value: Option<&str>) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

async fn list_products(
    State(store): State<ProductStore>,
    ctx: RequestContext,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let page = lenient(params.page.as_deref());
    let limit = match lenient(params.limit.as_deref()) {
        n if n < 1 => DEFAULT_LIMIT,
        n => n,
    };
    let search = params.search.unwrap_or_default();

    let page = ctx.bound(store.list(&search, page, limit)).await?;
    Ok(json_ok(StatusCode::OK, page))
}

async fn get_product(
    State(store): State<ProductStore>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let product = ctx.bound(store.get(id)).await??;
    Ok(json_ok(StatusCode::OK, product))
}

async fn create_product(
    State(store): State<ProductStore>,
    ctx: RequestContext,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult {
    let input = parse_body(body)?;
    let product = ctx.bound(store.create(input)).await??;
    tracing::info!(product_id = product.id, "Product created");
    Ok(json_ok(StatusCode::CREATED, product))
}

async fn update_product(
    State(store): State<ProductStore>,
    ctx: RequestContext,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let input = parse_body(body)?;
    let product = ctx.bound(store.update(id, input)).await??;
    Ok(json_ok(StatusCode::OK, product))
}

async fn delete_product(
    State(store): State<ProductStore>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    ctx.bound(store.delete(id)).await??;
    tracing::info!(product_id = id, "Product deleted");
    Ok(json_ok(StatusCode::OK, json!({"message": "product deleted"})))
}

async fn stats(State(store): State<ProductStore>, ctx: RequestContext) -> ApiResult {
    let stats = ctx.bound(store.stats()).await?;
    Ok(json_ok(StatusCode::OK, stats))
}

async fn health() -> Response {
    json_ok(
        StatusCode::OK,
        json!({"status": "healthy", "service": "storehub"}),
    )
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}
