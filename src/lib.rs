#![forbid(unsafe_code)]

//! `process-relay` launches processes on demand and broadcasts their
//! lifecycle to every connected observer.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
