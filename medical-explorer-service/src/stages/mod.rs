pub mod data_integrator;
pub mod data_retrieval;
pub mod domain_analysis;
pub mod query_analyzer;
pub mod utils;

// Re-export stage implementations
pub use data_integrator::DataIntegratorStage;
pub use data_retrieval::{DataRetrievalStage, RetrievalConfig};
pub use domain_analysis::{Domain, DomainAnalysisStage};
pub use query_analyzer::QueryAnalyzerStage;
