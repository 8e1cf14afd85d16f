//! WebSocket and HTTP front end for the caption relay.

pub mod client;
pub mod handlers;
pub mod http;
pub mod protocol;
pub mod server;

pub use client::ClientRegistry;
pub use handlers::HandlerState;
pub use server::{build_router, start, AppState, ServerConfig, ServerError, ServerHandle};
