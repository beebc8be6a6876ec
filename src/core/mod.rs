//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the reqprof
//! server: error handling and configuration.

pub mod error;
pub mod config;

// Re-export commonly used items
pub use error::{Error, ProfilerError, Result};
pub use config::Config;
