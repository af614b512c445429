use std::sync::Arc;

use med_flow::{
    Pipeline, PipelineBuilder, PipelineRunner, ReasoningEngine, Result, SimilaritySearch,
};

use crate::stages::{
    DataIntegratorStage, DataRetrievalStage, Domain, DomainAnalysisStage, QueryAnalyzerStage,
    RetrievalConfig,
};

/// The fixed medical exploration DAG:
///
/// ```text
/// query_analyzer -> data_retrieval -> { clinical | imaging | lab } -> data_integrator
/// ```
///
/// The three analysis branches run concurrently; the integrator joins them.
pub fn build_medical_pipeline(
    search: Arc<dyn SimilaritySearch>,
    reasoning: Arc<dyn ReasoningEngine>,
    retrieval: RetrievalConfig,
) -> Result<Pipeline> {
    PipelineBuilder::new("medical_exploration")
        .add_stage(Arc::new(QueryAnalyzerStage::new(reasoning.clone())))
        .add_stage(Arc::new(DataRetrievalStage::new(search, retrieval)))
        .add_stage(Arc::new(DomainAnalysisStage::new(
            Domain::Clinical,
            reasoning.clone(),
        )))
        .add_stage(Arc::new(DomainAnalysisStage::new(
            Domain::Imaging,
            reasoning.clone(),
        )))
        .add_stage(Arc::new(DomainAnalysisStage::new(
            Domain::Lab,
            reasoning.clone(),
        )))
        .add_stage(Arc::new(DataIntegratorStage::new(reasoning)))
        .add_edge("query_analyzer", "data_retrieval")
        .add_edge("data_retrieval", "clinical_analysis")
        .add_edge("data_retrieval", "imaging_analysis")
        .add_edge("data_retrieval", "lab_analysis")
        .add_edge("clinical_analysis", "data_integrator")
        .add_edge("imaging_analysis", "data_integrator")
        .add_edge("lab_analysis", "data_integrator")
        .build()
}

pub fn create_runner(
    search: Arc<dyn SimilaritySearch>,
    reasoning: Arc<dyn ReasoningEngine>,
    retrieval: RetrievalConfig,
) -> Result<PipelineRunner> {
    let pipeline = build_medical_pipeline(search, reasoning, retrieval)?;
    Ok(PipelineRunner::new(Arc::new(pipeline)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakySearch, ScriptedReasoning, StaticSearch, item};
    use async_trait::async_trait;
    use med_flow::{
        AnalysisOutcome, Field, FlowError, PipelineState, Stage, StateUpdate,
    };
    use std::time::Duration;

    fn fast_retrieval() -> RetrievalConfig {
        RetrievalConfig {
            k: 20,
            deadline: Duration::from_secs(1),
            retry: med_flow::RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
            },
        }
    }

    fn scripted_all() -> ScriptedReasoning {
        ScriptedReasoning::new()
            .on(
                "query analyzer",
                r#"{"symptoms": ["chest pain"], "conditions": ["abnormal cardiac findings"], "data_types_needed": ["clinical", "cardiology"], "search_terms": ["chest pain", "cardiac"]}"#,
            )
            .on("clinical data analyst", r#"{"conditions": ["angina"]}"#)
            .on("imaging analyst", r#"{"findings": []}"#)
            .on("laboratory data analyst", r#"{"tests": []}"#)
            .on("medical data analyst", "Two matching patients were found.")
    }

    #[tokio::test]
    async fn full_run_produces_final_response_and_all_three_keys() {
        let reasoning = Arc::new(scripted_all());
        let search = Arc::new(StaticSearch::new(vec![
            item("clinical", 0.9),
            item("cardiology", 0.8),
            item("ophthalmology", 0.7),
        ]));
        let runner =
            create_runner(search.clone(), reasoning, fast_retrieval()).unwrap();

        let state = runner
            .run_with_state("Find patients with chest pain and abnormal cardiac findings")
            .await
            .unwrap();

        assert_eq!(
            state.final_response.as_deref(),
            Some("Two matching patients were found.")
        );
        // Exactly the three analysis keys, regardless of which degraded.
        assert_eq!(state.structured_data.len(), 3);
        for key in ["clinical_analysis", "imaging_analysis", "lab_analysis"] {
            assert!(state.structured_data.contains_key(key), "missing {key}");
        }
        // The effective search string came from the extracted terms.
        assert_eq!(search.queries(), vec!["chest pain cardiac"]);
        // Every retrieved item is in search_results; the unrecognized tag is
        // in no bucket.
        assert_eq!(state.search_results.len(), 3);
        assert_eq!(state.cardiology_data.len(), 1);
        assert!(state.imaging_data.is_empty());
    }

    #[tokio::test]
    async fn imaging_gets_no_data_marker_while_clinical_is_analyzed() {
        let reasoning = Arc::new(scripted_all());
        let search = Arc::new(StaticSearch::new(vec![
            item("clinical", 0.9),
            item("clinical", 0.85),
        ]));
        let runner = create_runner(search, reasoning.clone(), fast_retrieval()).unwrap();

        let state = runner
            .run_with_state("Find patients with chest pain and abnormal cardiac findings")
            .await
            .unwrap();

        assert_eq!(
            state.structured_data["imaging_analysis"],
            AnalysisOutcome::NoData {
                message: "No imaging data found".to_string()
            }
        );
        assert_eq!(
            state.structured_data["clinical_analysis"],
            AnalysisOutcome::Structured {
                data: serde_json::json!({"conditions": ["angina"]})
            }
        );
        assert_eq!(state.patient_data.len(), 2);

        // The clinical analysis saw exactly the two retrieved records.
        let prompts = reasoning.prompts_for("clinical data analyst");
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].matches("clinical record").count(), 4); // 2 items x 2 buckets
    }

    #[tokio::test]
    async fn persistent_search_timeout_fails_the_run_before_analysis() {
        let reasoning = Arc::new(scripted_all());
        let search = Arc::new(FlakySearch::new(u32::MAX, Vec::new()));
        let runner = create_runner(search, reasoning, fast_retrieval()).unwrap();

        let failure = runner.run_with_state("any query").await.unwrap_err();
        assert!(matches!(failure.error, FlowError::Retrieval(_)));
        // The integrator never ran and the buckets are empty.
        assert!(failure.state.final_response.is_none());
        assert!(failure.state.structured_data.is_empty());
        assert!(failure.state.search_results.is_empty());
        assert!(failure.state.patient_data.is_empty());
    }

    #[tokio::test]
    async fn malformed_extraction_still_retrieves_on_the_raw_query() {
        let reasoning = Arc::new(
            ScriptedReasoning::new()
                .on("query analyzer", "sorry, no JSON today")
                .on("clinical data analyst", r#"{"conditions": []}"#)
                .on("imaging analyst", r#"{"findings": []}"#)
                .on("laboratory data analyst", r#"{"tests": []}"#)
                .on("medical data analyst", "Answer."),
        );
        let search = Arc::new(StaticSearch::new(vec![item("clinical", 0.9)]));
        let runner = create_runner(search.clone(), reasoning, fast_retrieval()).unwrap();

        let state = runner
            .run_with_state("elevated troponin levels")
            .await
            .unwrap();

        let analysis = state.query_analysis.unwrap();
        assert_eq!(analysis.search_terms, vec!["elevated troponin levels"]);
        assert!(analysis.conditions.is_empty());
        assert_eq!(search.queries(), vec!["elevated troponin levels"]);
        assert!(state.final_response.is_some());
    }

    /// Stand-in for a lab branch that dies instead of degrading.
    struct FaultyLabStage;

    #[async_trait]
    impl Stage for FaultyLabStage {
        fn id(&self) -> &str {
            "lab_analysis"
        }

        fn write_set(&self) -> &'static [Field] {
            &[Field::StructuredData]
        }

        async fn run(&self, _state: PipelineState) -> med_flow::Result<StateUpdate> {
            Err(FlowError::StageExecutionFailed(
                "lab analysis crashed".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn fatal_branch_failure_keeps_sibling_results_and_skips_integration() {
        let reasoning: Arc<ScriptedReasoning> = Arc::new(scripted_all());
        let search = Arc::new(StaticSearch::new(vec![item("clinical", 0.9)]));

        let pipeline = med_flow::PipelineBuilder::new("medical_exploration")
            .add_stage(Arc::new(QueryAnalyzerStage::new(reasoning.clone())))
            .add_stage(Arc::new(DataRetrievalStage::new(search, fast_retrieval())))
            .add_stage(Arc::new(DomainAnalysisStage::new(
                Domain::Clinical,
                reasoning.clone(),
            )))
            .add_stage(Arc::new(DomainAnalysisStage::new(
                Domain::Imaging,
                reasoning.clone(),
            )))
            .add_stage(Arc::new(FaultyLabStage))
            .add_stage(Arc::new(DataIntegratorStage::new(reasoning)))
            .add_edge("query_analyzer", "data_retrieval")
            .add_edge("data_retrieval", "clinical_analysis")
            .add_edge("data_retrieval", "imaging_analysis")
            .add_edge("data_retrieval", "lab_analysis")
            .add_edge("clinical_analysis", "data_integrator")
            .add_edge("imaging_analysis", "data_integrator")
            .add_edge("lab_analysis", "data_integrator")
            .build()
            .unwrap();

        let runner = PipelineRunner::new(Arc::new(pipeline));
        let failure = runner.run_with_state("query").await.unwrap_err();

        assert!(matches!(failure.error, FlowError::StageExecutionFailed(_)));
        // Completed siblings stay in the partial state.
        assert!(failure.state.structured_data.contains_key("clinical_analysis"));
        assert!(failure.state.structured_data.contains_key("imaging_analysis"));
        assert!(!failure.state.structured_data.contains_key("lab_analysis"));
        // The integrator never ran.
        assert!(failure.state.final_response.is_none());
    }
}
