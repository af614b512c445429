use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info};

use med_flow::{Field, FlowError, PipelineState, ReasoningEngine, Result, Stage, StateUpdate};

use super::domain_analysis::Domain;

const INTEGRATOR_PREAMBLE: &str = "You are a medical data analyst. You integrate findings from multiple medical data sources into clear, clinical responses for healthcare professionals.";

/// Assemble everything the synthesis call sees. A pure function of the state
/// snapshot: re-assembling an identical snapshot yields an identical view.
pub fn consolidated_view(state: &PipelineState) -> Value {
    json!({
        "query_analysis": state.query_analysis,
        "patient_data": state.patient_data,
        "imaging_data": state.imaging_data,
        "lab_results": state.lab_results,
        "clinical_notes": state.clinical_notes,
        "genomic_data": state.genomic_data,
        "pathology_data": state.pathology_data,
        "cardiology_data": state.cardiology_data,
        "structured_data": state.structured_data,
        "search_results": state.search_results,
    })
}

fn synthesis_prompt(state: &PipelineState, view: &Value) -> String {
    format!(
        r#"Based on the integrated medical data from multiple sources, provide a comprehensive response to the original query.

ORIGINAL QUERY: {query}

INTEGRATED DATA ANALYSIS:
{data}

Provide a comprehensive response including:
1. Summary of relevant findings across all data types
2. Patient cases matching the criteria (if any)
3. Patterns and insights discovered
4. Clinical correlations
5. Recommendations for further investigation

Format the response in a clear, clinical manner suitable for healthcare professionals."#,
        query = state.query,
        data = serde_json::to_string_pretty(view).unwrap_or_default(),
    )
}

/// The join of the fan-out: consolidates the full state and synthesizes the
/// final response. Runs only after all three analysis branches committed
/// their keys; synthesis failure is fatal, but the consolidated data already
/// computed stays attached to the failure.
pub struct DataIntegratorStage {
    reasoning: Arc<dyn ReasoningEngine>,
}

impl DataIntegratorStage {
    pub fn new(reasoning: Arc<dyn ReasoningEngine>) -> Self {
        Self { reasoning }
    }
}

#[async_trait]
impl Stage for DataIntegratorStage {
    fn id(&self) -> &str {
        "data_integrator"
    }

    fn write_set(&self) -> &'static [Field] {
        &[Field::FinalResponse]
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate> {
        // Join-barrier precondition: every branch must have committed its
        // key. A missing key here is a scheduler bug, not a degraded branch.
        for domain in [Domain::Clinical, Domain::Imaging, Domain::Lab] {
            if !state.structured_data.contains_key(domain.stage_id()) {
                return Err(FlowError::Integration(format!(
                    "structured_data is missing '{}'",
                    domain.stage_id()
                )));
            }
        }

        info!(
            stage = self.id(),
            search_results = state.search_results.len(),
            "synthesizing final response"
        );

        let view = consolidated_view(&state);
        let response = self
            .reasoning
            .generate(INTEGRATOR_PREAMBLE, &synthesis_prompt(&state, &view))
            .await
            .map_err(|err| {
                error!(stage = self.id(), "synthesis failed: {err}");
                FlowError::Integration(err.to_string())
            })?;

        Ok(StateUpdate::final_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedReasoning, item};
    use med_flow::AnalysisOutcome;

    fn state_with_all_keys() -> PipelineState {
        let mut state = PipelineState::new("q");
        for domain in [Domain::Clinical, Domain::Imaging, Domain::Lab] {
            state.structured_data.insert(
                domain.stage_id().to_string(),
                AnalysisOutcome::NoData {
                    message: domain.no_data_marker().to_string(),
                },
            );
        }
        state
    }

    #[tokio::test]
    async fn synthesis_writes_the_final_response() {
        let reasoning = ScriptedReasoning::new().on("medical data analyst", "Consolidated answer");
        let stage = DataIntegratorStage::new(Arc::new(reasoning));

        let update = stage.run(state_with_all_keys()).await.unwrap();
        assert_eq!(update.final_response.as_deref(), Some("Consolidated answer"));
    }

    #[tokio::test]
    async fn missing_analysis_key_fails_loudly() {
        let reasoning = ScriptedReasoning::new().on("medical data analyst", "answer");
        let stage = DataIntegratorStage::new(Arc::new(reasoning));

        let mut state = state_with_all_keys();
        state.structured_data.remove("lab_analysis");
        let err = stage.run(state).await.unwrap_err();
        assert!(matches!(err, FlowError::Integration(message) if message.contains("lab_analysis")));
    }

    #[tokio::test]
    async fn synthesis_failure_is_fatal() {
        let stage = DataIntegratorStage::new(Arc::new(ScriptedReasoning::new()));

        let err = stage.run(state_with_all_keys()).await.unwrap_err();
        assert!(matches!(err, FlowError::Integration(_)));
    }

    #[test]
    fn consolidated_view_is_idempotent() {
        let mut state = state_with_all_keys();
        state.search_results.push(item("clinical", 0.9));
        state.patient_data.push(item("clinical", 0.9));

        assert_eq!(consolidated_view(&state), consolidated_view(&state));
    }
}
