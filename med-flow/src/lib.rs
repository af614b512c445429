pub mod collab;
pub mod error;
pub mod graph;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod state;

// Re-export commonly used types
pub use collab::{ReasoningEngine, ReasoningError, SearchError, SimilaritySearch};
pub use error::{FlowError, Result, RunFailure};
pub use graph::{Edge, Pipeline, PipelineBuilder};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use runner::PipelineRunner;
pub use stage::Stage;
pub use state::{
    AnalysisOutcome, DataType, Field, MergePolicy, PipelineState, QueryAnalysis, RetrievedItem,
    StateUpdate,
};
