//! Utility modules

pub mod retry;
pub mod run_lock;

pub use retry::RetryPolicy;
pub use run_lock::RunLock;
