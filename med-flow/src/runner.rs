use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::{
    error::{FlowError, RunFailure},
    graph::Pipeline,
    state::PipelineState,
};

/// Caller boundary: seeds a fresh state with the query, runs the DAG, and
/// hands back the terminal response. One state per query; nothing is reused
/// across runs.
#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Run one query to completion and return the final response.
    pub async fn run(&self, query: &str) -> std::result::Result<String, RunFailure> {
        let state = self.run_with_state(query).await?;
        match state.final_response.clone() {
            Some(response) => Ok(response),
            // Terminal state without a response is a wiring bug, not a
            // caller-visible success.
            None => Err(RunFailure::new(
                FlowError::Integration("pipeline finished without a final response".to_string()),
                state,
            )),
        }
    }

    /// Like [`run`](Self::run), but hands back the full terminal state.
    pub async fn run_with_state(
        &self,
        query: &str,
    ) -> std::result::Result<PipelineState, RunFailure> {
        let run_id = Uuid::new_v4();
        info!(%run_id, pipeline = %self.pipeline.id, query, "starting pipeline run");

        let state = self.pipeline.execute(PipelineState::new(query)).await?;

        info!(%run_id, results = state.search_results.len(), "pipeline run completed");
        Ok(state)
    }
}
