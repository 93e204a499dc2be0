//! Ordered fan-out of chunk work onto a bounded task pool.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use fanclip_models::{ChunkResult, ChunkSpec};

use crate::config::PipelineConfig;
use crate::error::ChunkError;
use crate::metrics;
use crate::processor::ChunkWorker;
use crate::retry::{retry_async_if, RetryConfig};

/// Runs a worker over every spec and returns one result per spec, in the
/// same order as `specs` regardless of completion order.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn map_ordered(
        &self,
        worker: Arc<dyn ChunkWorker>,
        specs: Vec<ChunkSpec>,
    ) -> Vec<Result<ChunkResult, ChunkError>>;
}

/// Dispatcher on the local tokio runtime.
///
/// Each spec runs as its own task on a [`JoinSet`], at most
/// `max_parallel` at a time, each attempt bounded by `chunk_timeout`.
/// Dropping the returned future aborts every in-flight task.
#[derive(Debug, Clone)]
pub struct TaskPoolDispatcher {
    max_parallel: usize,
    chunk_timeout: Duration,
    retry: RetryConfig,
}

impl TaskPoolDispatcher {
    pub fn new(max_parallel: usize, chunk_timeout: Duration) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            chunk_timeout,
            retry: RetryConfig::new("chunk").with_max_retries(0),
        }
    }

    /// Retry retryable chunk failures up to `retries` extra times.
    pub fn with_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.retry = self
            .retry
            .with_max_retries(retries)
            .with_base_delay(base_delay);
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_parallel_chunks, config.chunk_timeout)
            .with_retries(config.chunk_retries, config.retry_base_delay)
    }
}

#[async_trait]
impl Dispatcher for TaskPoolDispatcher {
    async fn map_ordered(
        &self,
        worker: Arc<dyn ChunkWorker>,
        specs: Vec<ChunkSpec>,
    ) -> Vec<Result<ChunkResult, ChunkError>> {
        let indices: Vec<usize> = specs.iter().map(|s| s.index).collect();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        debug!(
            chunks = specs.len(),
            max_parallel = self.max_parallel,
            "Dispatching chunks"
        );

        for (position, spec) in specs.into_iter().enumerate() {
            let worker = Arc::clone(&worker);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            let limit = self.chunk_timeout;

            tasks.spawn(async move {
                let index = spec.index;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (position, Err(ChunkError::panicked(index, "task pool closed")));
                };

                let started = Instant::now();
                let result = retry_async_if(
                    &retry,
                    |_| run_once(Arc::clone(&worker), spec.clone(), limit),
                    ChunkError::is_retryable,
                )
                .await
                .into_result();

                let outcome = if result.is_ok() { "ok" } else { "failed" };
                metrics::record_chunk(outcome, started.elapsed());
                (position, result)
            });
        }

        let mut slots: Vec<Option<Result<ChunkResult, ChunkError>>> =
            indices.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, result)) => slots[position] = Some(result),
                Err(e) => warn!(error = %e, "Chunk task ended without a result"),
            }
        }

        slots
            .into_iter()
            .zip(indices)
            .map(|(slot, index)| {
                slot.unwrap_or_else(|| Err(ChunkError::panicked(index, "task ended without a result")))
            })
            .collect()
    }
}

/// One bounded attempt. Panics and timeouts become this chunk's error; the
/// timed-out future is dropped, which kills its child processes.
async fn run_once(
    worker: Arc<dyn ChunkWorker>,
    spec: ChunkSpec,
    limit: Duration,
) -> Result<ChunkResult, ChunkError> {
    let index = spec.index;
    let attempt = AssertUnwindSafe(worker.process(spec)).catch_unwind();

    match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(ChunkError::panicked(index, panic_message(panic.as_ref()))),
        Err(_) => Err(ChunkError::timeout(index, limit)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
