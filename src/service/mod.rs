//! Pad Replay REST Service
//!
//! Exposes the per-document analytics over HTTP.
//!
//! ## Endpoints
//!
//! - `GET /api/pads/:pad/cohesion` - Cohesion graph
//! - `GET /api/pads/:pad/blocks` - Author blocks for the minimap
//! - `GET /api/pads/:pad/timeline` - Day-by-day author snapshots
//! - `GET /api/pads/:pad/status` - Replay progress
//! - `POST /api/pads/:pad/scroll` - Queue scroll events
//! - `POST /api/pads/:pad/sessions` - Queue login sessions
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness check
//! - `GET /health/ready` - Readiness check

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_ingest};
pub use routes::{create_router, AppState};
pub use state::{PolicyRef, ServiceState, StoreHealth};
