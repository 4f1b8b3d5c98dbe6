//! Observer-facing transports.
//!
//! Both the WebSocket and the local IPC gateway turn each connection into a
//! [`session::Session`]; neither touches process state directly.

pub mod ipc;
pub mod session;
pub mod ws;
