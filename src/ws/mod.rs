//! Real-time chat and notifications over WebSocket

pub mod hub;

pub use hub::{serve_ws, ClientEvent, Hub, WsMessage, HUB};
