use async_trait::async_trait;

use crate::{
    error::Result,
    state::{Field, PipelineState, StateUpdate},
};

/// Unit of work in the pipeline.
///
/// A stage reads a snapshot of the shared state and returns a partial update;
/// the scheduler merges the update on the stage's behalf and audits it
/// against the declared write-set. Stages never mutate shared state directly,
/// which is what makes concurrent dispatch of disjoint-write stages safe.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique identifier; also the node name in the pipeline graph.
    fn id(&self) -> &str;

    /// Fields this stage is allowed to write. A returned update touching
    /// anything outside this set fails the run loudly.
    fn write_set(&self) -> &'static [Field];

    /// Execute against a snapshot of the current state.
    async fn run(&self, state: PipelineState) -> Result<StateUpdate>;
}
