//! Job runner: drives jobs through Pending -> Processing -> terminal.
//!
//! Workers claim queued jobs, execute the operation registered for their kind with retries and
//! per-attempt timeouts, and record exactly one terminal outcome in the store. A separate
//! [`TimeoutSweeper`] fails jobs that stay Processing past the configured ceiling.

mod checkpoint;
mod config;
mod runner;
mod sanitize;
mod sweep;
mod trait_;

pub use config::RunnerConfig;
pub use runner::JobRunner;
pub use sanitize::sanitize_error_message;
pub use sweep::TimeoutSweeper;
pub use trait_::{Scheduler, SchedulerError};
