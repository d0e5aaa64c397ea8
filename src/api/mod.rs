//! HTTP surface: router, handlers, shared state, CORS, and error mapping.

mod cors;
mod error;
mod routes;
mod state;

pub use cors::CorsPolicy;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
