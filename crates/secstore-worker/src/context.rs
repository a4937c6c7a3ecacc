//! Command handler context trait
//!
//! The agent implements this for its dispatcher. The pool holds a weak
//! reference and calls `execute` for every queued command.

use async_trait::async_trait;
use secstore_core::models::{Answer, Command};
use std::sync::{Arc, Weak};

#[async_trait]
pub trait CommandHandlerContext: Send + Sync {
    /// Execute a command to completion. Failures are reported in the answer.
    async fn execute(self: Arc<Self>, command: Command) -> Answer;
}

/// Placeholder used before the real context exists. Every command fails.
struct NoopContext;

#[async_trait]
impl CommandHandlerContext for NoopContext {
    async fn execute(self: Arc<Self>, _command: Command) -> Answer {
        Answer::failed("no command handler available")
    }
}

/// Weak reference to a no-op context. It never upgrades, so commands
/// submitted against it fail with "handler unavailable".
pub fn empty_context_weak() -> Weak<dyn CommandHandlerContext> {
    let n: Arc<dyn CommandHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
