//! Middleware pipeline composition.
//!
//! A [`Stage`] turns the next [`Handler`] into a new handler. A [`Pipeline`]
//! folds an ordered list of stages around a terminal handler once, at
//! construction; the first stage listed is the outermost.
//!
//! ```text
//! compose(T, [A, B, C])  ==  A.wrap(B.wrap(C.wrap(T)))
//!
//! request  ──▶ A ──▶ B ──▶ C ──▶ T
//! response ◀── A ◀── B ◀── C ◀──┘
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

type HandlerFn = dyn Fn(Request<Body>) -> BoxFuture<'static, Response> + Send + Sync;

/// A cheaply cloneable request handler.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Build a handler from an async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self(Arc::new(move |req| -> BoxFuture<'static, Response> {
            Box::pin(f(req))
        }))
    }

    /// Adapt any infallible tower service (e.g. an axum `Router`).
    pub fn from_service<S>(service: S) -> Self
    where
        S: Service<Request<Body>, Error = Infallible> + Clone + Send + Sync + 'static,
        S::Response: IntoResponse,
        S::Future: Send + 'static,
    {
        Self::new(move |req| {
            let service = service.clone();
            async move {
                match service.oneshot(req).await {
                    Ok(response) => response.into_response(),
                    Err(never) => match never {},
                }
            }
        })
    }

    /// Invoke the handler.
    pub fn call(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        (self.0)(req)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// One link in the middleware pipeline.
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Wrap `next`, returning the handler that runs this stage first.
    fn wrap(&self, next: Handler) -> Handler;
}

/// A composed, immutable middleware pipeline.
#[derive(Clone)]
pub struct Pipeline {
    handler: Handler,
    stages: Arc<[&'static str]>,
}

impl Pipeline {
    /// Fold `stages` around `terminal`. `stages[0]` becomes outermost.
    pub fn compose(terminal: Handler, stages: Vec<Box<dyn Stage>>) -> Self {
        let names = stages.iter().map(|stage| stage.name()).collect::<Vec<_>>();
        let handler = stages
            .iter()
            .rev()
            .fold(terminal, |next, stage| stage.wrap(next));

        tracing::debug!(stages = ?names, "Pipeline composed");

        Self {
            handler,
            stages: names.into(),
        }
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stage names, outermost first.
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }

    /// Run a request through the whole pipeline.
    pub fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        self.handler.call(req)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .finish()
    }
}

impl Service<Request<Body>> for Pipeline {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let response = self.handle(req);
        Box::pin(async move { Ok(response.await) })
    }
}

/// Collects stages in order, outermost first.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append `stage` only when `enabled` is set.
    pub fn stage_if<S: Stage + 'static>(self, enabled: bool, stage: S) -> Self {
        if enabled {
            self.stage(stage)
        } else {
            self
        }
    }

    pub fn build(self, terminal: Handler) -> Pipeline {
        Pipeline::compose(terminal, self.stages)
    }
}
