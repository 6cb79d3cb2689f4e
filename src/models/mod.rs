pub mod chat;
pub mod metrics;
pub mod session;
pub mod websocket;
