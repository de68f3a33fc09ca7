//! HTTP API handlers for sitrep-wizard

pub mod erp;
pub mod health;
pub mod session;
pub mod sse;

pub use erp::erp_routes;
pub use health::health_routes;
pub use session::session_routes;
pub use sse::event_stream;
