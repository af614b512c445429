use thiserror::Error;

use crate::state::{Field, PipelineState};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("stage not found: {0}")]
    StageNotFound(String),

    #[error("invalid pipeline graph: {0}")]
    InvalidGraph(String),

    #[error("single-writer field {0:?} written twice")]
    WriteConflict(Field),

    #[error("structured data key '{0}' inserted twice")]
    KeyCollision(String),

    #[error("stage '{stage}' wrote undeclared field {field:?}")]
    UndeclaredWrite { stage: String, field: Field },

    #[error("analysis output could not be parsed: {0}")]
    AnalysisParse(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("integration failed: {0}")]
    Integration(String),

    #[error("stage execution failed: {0}")]
    StageExecutionFailed(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Terminal failure of a pipeline run. Carries whatever partial state existed
/// when the fatal error surfaced, so callers can inspect already-computed
/// results for diagnostics.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct RunFailure {
    pub error: FlowError,
    pub state: Box<PipelineState>,
}

impl RunFailure {
    pub fn new(error: FlowError, state: PipelineState) -> Self {
        Self {
            error,
            state: Box::new(state),
        }
    }
}
