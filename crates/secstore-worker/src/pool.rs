//! Worker pool: bounded queue, fixed number of concurrent executions.
//!
//! Shutdown: [`WorkerPool::shutdown`] stops accepting queued commands; it does
//! not cancel commands that are already running.

use secstore_core::models::{Answer, Command};
use secstore_core::AppError;
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use uuid::Uuid;

use crate::context::CommandHandlerContext;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker pool is not accepting commands")]
    QueueClosed,

    #[error("command {0} was dropped before it produced an answer")]
    Dropped(Uuid),
}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    /// Commands that may wait for a free worker before `submit` blocks.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 256,
        }
    }
}

struct Job {
    id: Uuid,
    command: Command,
    reply: oneshot::Sender<Answer>,
}

#[derive(Clone)]
pub struct WorkerPool {
    jobs_tx: mpsc::Sender<Job>,
    shutdown_tx: mpsc::Sender<()>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Start the pool. `context` is held weakly; once it is dropped, queued
    /// commands fail instead of running.
    pub fn new(config: WorkerPoolConfig, context: Weak<dyn CommandHandlerContext>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let max_workers = config.max_workers.max(1);
        tokio::spawn(async move {
            Self::run(max_workers, jobs_rx, shutdown_rx, context).await;
        });

        Self {
            jobs_tx,
            shutdown_tx,
            config,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    /// Queue `command` and wait for its answer.
    pub async fn submit(&self, command: Command) -> Result<Answer, WorkerError> {
        let id = Uuid::new_v4();
        let (reply, answer) = oneshot::channel();
        let kind = command.kind();

        self.jobs_tx
            .send(Job { id, command, reply })
            .await
            .map_err(|_| WorkerError::QueueClosed)?;
        tracing::debug!(job_id = %id, command = ?kind, "Command queued");

        answer.await.map_err(|_| WorkerError::Dropped(id))
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn run(
        max_workers: usize,
        mut jobs_rx: mpsc::Receiver<Job>,
        mut shutdown_rx: mpsc::Receiver<()>,
        context: Weak<dyn CommandHandlerContext>,
    ) {
        tracing::info!(max_workers, "Worker pool started");
        let semaphore = Arc::new(Semaphore::new(max_workers));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Worker pool shutting down");
                    break;
                }
                job = jobs_rx.recv() => {
                    let Some(job) = job else { break };
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let ctx = context.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::execute(job, ctx).await;
                    });
                }
            }
        }

        tracing::info!("Worker pool stopped");
    }

    async fn execute(job: Job, context: Weak<dyn CommandHandlerContext>) {
        let start = Instant::now();
        let kind = job.command.kind();

        let answer = match context.upgrade() {
            Some(ctx) => ctx.execute(job.command).await,
            None => {
                tracing::error!(job_id = %job.id, "Command handler context is gone");
                Answer::failed("command handler unavailable")
            }
        };

        tracing::info!(
            job_id = %job.id,
            command = ?kind,
            success = answer.success,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Command finished"
        );

        if job.reply.send(answer).is_err() {
            tracing::warn!(job_id = %job.id, "Submitter went away before the answer was ready");
        }
    }
}
