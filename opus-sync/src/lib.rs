//! opus-sync library
//!
//! Keeps a streaming playlist in sync with the tracks a radio station aired over
//! a sliding window (three days by default).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{Result, SyncError};
