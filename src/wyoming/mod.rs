//! Wyoming protocol support: event vocabulary, wire framing, TCP server

pub mod codec;
pub mod event;
pub mod server;

pub use server::Server;
