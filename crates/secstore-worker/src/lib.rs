//! Worker pool for long-running commands (downloads and copies).
//!
//! Commands are queued over a channel and executed by at most
//! `max_workers` tasks at a time; each submitter awaits its own answer.

pub mod context;
pub mod pool;

pub use context::{empty_context_weak, CommandHandlerContext};
pub use pool::{WorkerError, WorkerPool, WorkerPoolConfig};
