//! HTTP surface for the routing engine in `gateway-core`: config loading,
//! the axum application, and the OpenAI-compatible handlers.

pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::create_server;
