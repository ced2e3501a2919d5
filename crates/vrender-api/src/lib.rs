//! Axum HTTP API server.
//!
//! This crate provides:
//! - Render job submission and status endpoints
//! - HS256 bearer token authentication
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use auth::{AuthUser, JwtVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{JobStatusView, RenderJobService};
pub use state::AppState;
