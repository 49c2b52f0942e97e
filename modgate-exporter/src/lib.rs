//! HTTP presentation of a modgate [`Controller`](modgate_controller::Controller).
//!
//! # Endpoints
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/tags` | JSON array of `{name, display_name, group, value}` |
//! | `POST` | `/api/v1/write` | body `{name, value}`; `200` or `400` with a reason |
//! | `GET` | metrics path (`/metrics`) | Prometheus text exposition |
//! | `GET` | `/health` | always `200` |
//! | `GET` | `/ready` | `200` while the poll engine is running, else `503` |
//!
//! # Configuration
//!
//! See [`config::HttpConfig`].

pub mod config;
pub mod http;
pub mod metrics;

pub use config::HttpConfig;
pub use http::{HttpServer, create_router};
pub use metrics::MetricsRenderer;
