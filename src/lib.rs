//! Reqprof - a demonstration HTTP server with per-request profiling
//!
//! Reqprof serves a handful of synthetic workload endpoints and, when
//! profiling is enabled, records a CPU profile and a heap snapshot for
//! every request it handles, writing both to a profiles directory.
#![warn(missing_docs)]

// jemalloc as the global allocator; heap snapshots are produced from its
// profiling data, so the allocator choice is load-bearing here.
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// jemalloc profiling must be switched on at process start for heap
/// snapshots to contain allocation data.
#[cfg(not(target_env = "msvc"))]
#[allow(non_upper_case_globals)]
#[export_name = "malloc_conf"]
pub static malloc_conf: &[u8] = b"prof:true,prof_active:true,lg_prof_sample:19\0";

// Core foundational modules
pub mod core;

// Main functional modules
pub mod profiler;
pub mod api;

// Re-export commonly used items for convenience
pub use crate::core::{Config, Error, Result};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
