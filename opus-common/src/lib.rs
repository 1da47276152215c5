//! # Opus Sync Common Library
//!
//! Shared code for the opus-sync workspace:
//! - Common error type
//! - Bootstrap TOML configuration and cache folder resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
