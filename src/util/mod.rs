//! Utility modules: logging setup and engine configuration.

pub mod config;
pub mod logger;
