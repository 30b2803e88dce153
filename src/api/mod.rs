//! HTTP API: REST resources plus the SSE turn endpoint.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod turn;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
