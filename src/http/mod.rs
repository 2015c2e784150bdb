//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, HTTP/1.1 or HTTP/2)
//!     → pipeline.rs (stages, outermost first)
//!     → request.rs (request ID, context, client key)
//!     → catalog handlers (terminal)
//!     → response.rs (JSON envelope)
//!     → Send to client
//! ```

pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{Handler, Pipeline, Stage};
pub use request::{RequestContext, RequestContextExt, RequestId, RequestIdentity, X_REQUEST_ID};
pub use server::{ConnectionTimeouts, HttpServer};
