use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use med_flow::{
    Field, FlowError, PipelineState, QueryAnalysis, ReasoningEngine, Result, Stage, StateUpdate,
};

use super::utils::extract_json_object;

const QUERY_ANALYZER_PREAMBLE: &str = "You are a medical query analyzer. You extract medical entities, conditions and search criteria from free-text queries and reply with valid JSON only.";

fn extraction_prompt(query: &str) -> String {
    format!(
        r#"Analyze the following medical query and extract all relevant medical entities, conditions, and search criteria.

QUERY: {query}

Extract the following information as JSON:
{{
    "symptoms": ["list of symptoms mentioned"],
    "lab_tests": ["list of lab tests and criteria"],
    "imaging_studies": ["list of imaging studies and findings"],
    "conditions": ["list of medical conditions"],
    "demographics": ["age, gender, etc if mentioned"],
    "exclusions": ["exclusion criteria"],
    "data_types_needed": ["imaging", "clinical", "genomic", "pathology", "cardiology"],
    "search_terms": ["key terms for vector search"]
}}

Return only valid JSON."#
    )
}

fn parse_query_analysis(reply: &str) -> Result<QueryAnalysis> {
    let json = extract_json_object(reply)
        .ok_or_else(|| FlowError::AnalysisParse("no JSON object in reply".to_string()))?;
    serde_json::from_str(json).map_err(|err| FlowError::AnalysisParse(err.to_string()))
}

/// Extracts a structured [`QueryAnalysis`] from the raw query. Never blocks
/// the pipeline: reasoning or parse failures degrade to a fallback analysis
/// that searches on the raw query.
pub struct QueryAnalyzerStage {
    reasoning: Arc<dyn ReasoningEngine>,
}

impl QueryAnalyzerStage {
    pub fn new(reasoning: Arc<dyn ReasoningEngine>) -> Self {
        Self { reasoning }
    }
}

#[async_trait]
impl Stage for QueryAnalyzerStage {
    fn id(&self) -> &str {
        "query_analyzer"
    }

    fn write_set(&self) -> &'static [Field] {
        &[Field::QueryAnalysis]
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate> {
        info!(stage = self.id(), "analyzing query");

        let analysis = match self
            .reasoning
            .generate(QUERY_ANALYZER_PREAMBLE, &extraction_prompt(&state.query))
            .await
        {
            Ok(reply) => match parse_query_analysis(&reply) {
                Ok(analysis) => analysis,
                Err(err) => {
                    warn!(
                        stage = self.id(),
                        "extraction unparsable, falling back to raw query: {err}"
                    );
                    QueryAnalysis::fallback(&state.query)
                }
            },
            Err(err) => {
                warn!(
                    stage = self.id(),
                    "reasoning engine failed, falling back to raw query: {err}"
                );
                QueryAnalysis::fallback(&state.query)
            }
        };

        info!(
            stage = self.id(),
            search_terms = analysis.search_terms.len(),
            data_types = analysis.data_types_needed.len(),
            "query analysis ready"
        );
        Ok(StateUpdate::query_analysis(analysis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedReasoning;
    use med_flow::DataType;

    #[tokio::test]
    async fn valid_extraction_is_parsed() {
        let reasoning = ScriptedReasoning::new().on(
            "query analyzer",
            r#"{"symptoms": ["chest pain"], "data_types_needed": ["imaging", "cardiology"], "search_terms": ["chest pain", "cardiac"]}"#,
        );
        let stage = QueryAnalyzerStage::new(Arc::new(reasoning));

        let update = stage
            .run(PipelineState::new("Find patients with chest pain"))
            .await
            .unwrap();
        let analysis = update.query_analysis.unwrap();
        assert_eq!(analysis.symptoms, vec!["chest pain"]);
        assert_eq!(
            analysis.data_types_needed,
            vec![DataType::Imaging, DataType::Cardiology]
        );
        assert_eq!(analysis.search_terms, vec!["chest pain", "cardiac"]);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_to_raw_query() {
        let reasoning =
            ScriptedReasoning::new().on("query analyzer", "I could not think of any JSON");
        let stage = QueryAnalyzerStage::new(Arc::new(reasoning));

        let update = stage.run(PipelineState::new("chest pain")).await.unwrap();
        let analysis = update.query_analysis.unwrap();
        assert_eq!(analysis.search_terms, vec!["chest pain"]);
        assert!(analysis.symptoms.is_empty());
        assert!(analysis.data_types_needed.is_empty());
    }

    #[tokio::test]
    async fn out_of_set_data_type_falls_back() {
        let reasoning = ScriptedReasoning::new().on(
            "query analyzer",
            r#"{"data_types_needed": ["telepathy"], "search_terms": ["x"]}"#,
        );
        let stage = QueryAnalyzerStage::new(Arc::new(reasoning));

        let update = stage.run(PipelineState::new("strange query")).await.unwrap();
        let analysis = update.query_analysis.unwrap();
        assert_eq!(analysis.search_terms, vec!["strange query"]);
        assert!(analysis.data_types_needed.is_empty());
    }

    #[tokio::test]
    async fn reasoning_failure_falls_back_to_raw_query() {
        let stage = QueryAnalyzerStage::new(Arc::new(ScriptedReasoning::new()));

        let update = stage.run(PipelineState::new("chest pain")).await.unwrap();
        assert_eq!(
            update.query_analysis.unwrap().search_terms,
            vec!["chest pain"]
        );
    }
}
