//! HTTP surface for admission checks and limiter administration.

pub mod handlers;
mod server;

pub use handlers::AppState;
pub use server::{router, HttpServer};
