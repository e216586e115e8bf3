//! The Prometheus text-format `/metrics` endpoint. `spec.md` §6 scopes
//! this to a single `GET /metrics` route; any other path gets a 404 HTML
//! page, matching the simple single-route surface of the teacher's own
//! metrics/status endpoints.

pub mod config;
pub mod render;
pub mod server;

pub use config::MetricsConfig;
pub use server::{serve, MetricsState};
