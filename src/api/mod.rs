//! HTTP surface: submit a document for analysis and poll its task status.
//!
//! `api_router()` returns a plain axum `Router`; `server::serve` binds it
//! and runs until the shutdown signal fires.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::serve;
pub use types::ApiContext;
