//! Hand-off between blocking filesystem work and the task awaiting it
//!
//! A `spawn_blocking` closure keeps running after its awaiting future gives
//! up (timeout, dropped request). The worker checks [`HandoffWorker::ensure_wanted`]
//! before writing into a store and publishes its result with
//! [`HandoffWorker::finish`], passing the action that reverts it. Whichever
//! side observes the other second runs that action, so a result nobody
//! accepted never stays in the canonical layout.

use secstore_core::AppError;
use std::sync::{Arc, Mutex, MutexGuard};

type Undo = Box<dyn FnOnce() + Send + 'static>;

enum Stage {
    Running,
    Abandoned,
    Finished(Undo),
    Accepted,
}

/// Create the two ends of a hand-off.
pub fn handoff() -> (HandoffWaiter, HandoffWorker) {
    let stage = Arc::new(Mutex::new(Stage::Running));
    (
        HandoffWaiter {
            stage: stage.clone(),
        },
        HandoffWorker { stage },
    )
}

fn lock(stage: &Mutex<Stage>) -> MutexGuard<'_, Stage> {
    stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn abandoned() -> AppError {
    AppError::Internal("result abandoned by its caller".to_string())
}

/// Awaiting side. Dropping it without [`HandoffWaiter::accept`] abandons
/// the work.
pub struct HandoffWaiter {
    stage: Arc<Mutex<Stage>>,
}

impl HandoffWaiter {
    /// Keep the finished result; its undo action is dropped unused.
    pub fn accept(self) {
        *lock(&self.stage) = Stage::Accepted;
    }
}

impl Drop for HandoffWaiter {
    fn drop(&mut self) {
        let previous = {
            let mut stage = lock(&self.stage);
            if matches!(*stage, Stage::Accepted) {
                return;
            }
            std::mem::replace(&mut *stage, Stage::Abandoned)
        };
        if let Stage::Finished(undo) = previous {
            tracing::warn!("Reverting result finished after its caller gave up");
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(undo);
                }
                Err(_) => undo(),
            }
        }
    }
}

/// Blocking side.
pub struct HandoffWorker {
    stage: Arc<Mutex<Stage>>,
}

impl HandoffWorker {
    /// Fails once the caller has stopped waiting.
    pub fn ensure_wanted(&self) -> Result<(), AppError> {
        match *lock(&self.stage) {
            Stage::Abandoned => Err(abandoned()),
            _ => Ok(()),
        }
    }

    /// Publish a finished result. When the caller already left, `undo` runs
    /// here and an error is returned instead.
    pub fn finish(&self, undo: impl FnOnce() + Send + 'static) -> Result<(), AppError> {
        let mut stage = lock(&self.stage);
        match *stage {
            Stage::Abandoned => {
                drop(stage);
                tracing::warn!("Caller gave up before the result was ready; reverting");
                undo();
                Err(abandoned())
            }
            _ => {
                *stage = Stage::Finished(Box::new(undo));
                Ok(())
            }
        }
    }
}
