//! # Stratus Server
//!
//! The HTTP front end: a thin axum adapter over the typed services. Every
//! handler decodes the wire shape, calls one service operation with an
//! [`stratus_core::OpContext`], and encodes the result; errors flow
//! through one conversion into the Google-style error envelope.
//!
//! ## Mount points
//!
//! - `/storage/v1` + `/upload/storage/v1` + `/download/storage/v1`: Cloud
//!   Storage JSON API subset (buckets, objects, media, resumable uploads,
//!   signed URLs).
//! - `/compute/v1`: Compute Engine subset (networks, subnetworks,
//!   firewalls, routes, instances, zones, machine types, operations).
//! - `/v1`: IAM subset (service accounts, keys, policies, roles).

mod error;
mod routes;
mod state;
mod wire;

pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::storage::router())
        .merge(routes::compute::router())
        .merge(routes::iam::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
