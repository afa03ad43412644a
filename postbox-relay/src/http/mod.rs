//! HTTP endpoints for postbox-relay.
//!
//! Provides health checks and Prometheus metrics. Disabled unless
//! `http.enabled` is set.

pub mod health;
mod metrics;

use crate::server::RelayServer;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<RelayServer>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}
