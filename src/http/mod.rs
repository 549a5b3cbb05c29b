//! HTTP listener for the webhook endpoint
//!
//! This module provides:
//! - Axum router served over a bounded accept loop with graceful shutdown
//! - Listener binding with port reclaim
//! - Signature and timeout middleware
//! - JSON response mapping
//!
//! The server exposes a single path:
//! - GET / - Listener status
//! - POST / - Pull the project and revalidate caches

pub mod handlers;
pub mod listener;
pub mod middleware;
pub mod responses;
pub mod server;

pub use server::start_server;
