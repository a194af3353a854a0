//! HTTP surface: a health check, the realtime WebSocket upgrade, and the
//! queue admin endpoints. REST CRUD on projects/tags is out of scope.

pub mod queue_handlers;
pub mod routes;
pub mod ws_handlers;

pub use queue_handlers::health;

pub use routes::create_router;
