//! # API Module
//!
//! This module provides the HTTP surface of the reqprof server:
//! - `GET /` - synthetic heavy-computation workload
//! - `GET /work` - synthetic lighter workload
//! - `GET /profiles` - list profile artifacts currently on disk
//!
//! When profiling is enabled every request is wrapped by the profiling
//! middleware, which records a CPU profile and heap snapshot for it.

pub mod handlers;
pub mod middleware;
pub mod server;

// Re-export commonly used items
pub use server::{create_app, start_server, AppState};
