#![forbid(unsafe_code)]

//! Discovery of a locally running companion server, a resilient live event
//! subscription to it, and one-shot editor actions over HTTP.

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod requests;
pub mod retry;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use errors::{AppError, Result};
