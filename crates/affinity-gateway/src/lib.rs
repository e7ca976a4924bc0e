//! HTTP gateway for the scheduling core.
//!
//! Thin Axum layer over the registry, history, and dispatcher. The
//! gateway owns the two checks the core delegates to its caller: the
//! shared API token on management routes, and the workflow-ownership
//! check against the `X-Owner-Id` header resolved by the upstream app.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router};
