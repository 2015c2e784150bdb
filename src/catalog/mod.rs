//! Product catalog: records, storage and routes.
//!
//! # Data Flow
//! ```text
//! pipeline (terminal)
//!     → handlers.rs (parse path/query/body, JSON envelope)
//!     → store.rs (in-memory table, bound to the request deadline)
//!     → model.rs (validation, stats, pages)
//! ```

pub mod handlers;
pub mod model;
pub mod store;

pub use handlers::router;
pub use model::{Product, ProductInput, ProductPage, Stats};
pub use store::{ProductStore, StoreError};
