//! Reference agent transport: a framed TCP listener

mod handler;
mod listener;

pub use handler::{handle_connection, ServerContext};
pub use listener::AgentServer;
