//! Fan-out coordination: one ordered batch in, one ordered batch out.

use std::sync::Arc;

use tracing::{info, warn};

use fanclip_models::{ChunkResult, ChunkSpec};

use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::processor::ChunkWorker;

/// Submits every chunk as one batch and waits for all of them.
///
/// Results come back in plan order. Failures are collected rather than
/// short-circuited, so the error names every failed chunk.
pub struct FanOutCoordinator {
    dispatcher: Arc<dyn Dispatcher>,
    worker: Arc<dyn ChunkWorker>,
}

impl FanOutCoordinator {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, worker: Arc<dyn ChunkWorker>) -> Self {
        Self { dispatcher, worker }
    }

    pub async fn map_ordered(&self, specs: &[ChunkSpec]) -> PipelineResult<Vec<ChunkResult>> {
        let results = self
            .dispatcher
            .map_ordered(Arc::clone(&self.worker), specs.to_vec())
            .await;

        if results.len() != specs.len() {
            return Err(PipelineError::OrderViolation(format!(
                "submitted {} chunks, got {} results",
                specs.len(),
                results.len()
            )));
        }

        let mut completed = Vec::with_capacity(specs.len());
        let mut failures = Vec::new();

        for (position, (spec, result)) in specs.iter().zip(results).enumerate() {
            let got = match &result {
                Ok(r) => r.index,
                Err(e) => e.index,
            };
            if got != spec.index {
                return Err(PipelineError::OrderViolation(format!(
                    "position {position}: expected chunk {}, got {got}",
                    spec.index
                )));
            }

            match result {
                Ok(r) => completed.push(r),
                Err(e) => {
                    warn!(index = e.index, kind = %e.kind, error = %e.message, "Chunk failed");
                    failures.push(e);
                }
            }
        }

        if !failures.is_empty() {
            return Err(PipelineError::chunks_failed(failures));
        }

        info!(chunks = completed.len(), "All chunks completed");
        Ok(completed)
    }
}
