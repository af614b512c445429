use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use med_flow::{
    AnalysisOutcome, Field, PipelineState, ReasoningEngine, Result, RetrievedItem, Stage,
    StateUpdate,
};

use super::utils::extract_json_object;

/// The three parallel analysis branches. Each writes exactly one key into
/// structured_data; the keys are disjoint by construction, which is what
/// makes concurrent execution safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Clinical,
    Imaging,
    Lab,
}

impl Domain {
    /// Stage id, doubling as the structured_data key.
    pub fn stage_id(self) -> &'static str {
        match self {
            Domain::Clinical => "clinical_analysis",
            Domain::Imaging => "imaging_analysis",
            Domain::Lab => "lab_analysis",
        }
    }

    pub fn no_data_marker(self) -> &'static str {
        match self {
            Domain::Clinical => "No clinical data found",
            Domain::Imaging => "No imaging data found",
            Domain::Lab => "No lab data found",
        }
    }

    fn buckets(self, state: &PipelineState) -> Vec<&[RetrievedItem]> {
        match self {
            Domain::Clinical => vec![&state.patient_data, &state.clinical_notes],
            Domain::Imaging => vec![&state.imaging_data],
            Domain::Lab => vec![&state.lab_results],
        }
    }

    fn preamble(self) -> &'static str {
        match self {
            Domain::Clinical => {
                "You are a clinical data analyst. You extract structured patient information from clinical records and reply with valid JSON only."
            }
            Domain::Imaging => {
                "You are a medical imaging analyst. You extract structured findings from imaging records and reply with valid JSON only."
            }
            Domain::Lab => {
                "You are a laboratory data analyst. You extract structured findings from lab results and reply with valid JSON only."
            }
        }
    }

    fn extraction_prompt(self, state: &PipelineState) -> String {
        match self {
            Domain::Clinical => format!(
                r#"Analyze the following clinical data and extract structured patient information:

PATIENT DATA:
{}

CLINICAL NOTES:
{}

Extract:
- Patient demographics
- Medical conditions
- Symptoms
- Treatments
- Lab results
- Risk factors

Return as structured JSON."#,
                render_items(&state.patient_data),
                render_items(&state.clinical_notes),
            ),
            Domain::Imaging => format!(
                r#"Analyze the following medical imaging data:

IMAGING DATA:
{}

Extract:
- Imaging modalities
- Findings
- Abnormalities
- Correlations with clinical data

Return as structured JSON."#,
                render_items(&state.imaging_data),
            ),
            Domain::Lab => format!(
                r#"Analyze the following laboratory results:

LAB DATA:
{}

Extract:
- Test types
- Abnormal values
- Trends
- Clinical significance

Return as structured JSON."#,
                render_items(&state.lab_results),
            ),
        }
    }
}

fn render_items(items: &[RetrievedItem]) -> String {
    serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string())
}

/// One analysis branch of the fan-out. Failures never escape: an empty
/// domain yields an explicit no-data marker, a broken reasoning call a
/// degraded marker, so the join barrier always sees this branch's key.
pub struct DomainAnalysisStage {
    domain: Domain,
    reasoning: Arc<dyn ReasoningEngine>,
}

impl DomainAnalysisStage {
    pub fn new(domain: Domain, reasoning: Arc<dyn ReasoningEngine>) -> Self {
        Self { domain, reasoning }
    }
}

#[async_trait]
impl Stage for DomainAnalysisStage {
    fn id(&self) -> &str {
        self.domain.stage_id()
    }

    fn write_set(&self) -> &'static [Field] {
        &[Field::StructuredData]
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate> {
        let records: usize = self.domain.buckets(&state).iter().map(|b| b.len()).sum();

        let outcome = if records == 0 {
            info!(stage = self.id(), "no records in domain buckets");
            AnalysisOutcome::NoData {
                message: self.domain.no_data_marker().to_string(),
            }
        } else {
            info!(stage = self.id(), records, "analyzing domain records");
            match self
                .reasoning
                .generate(self.domain.preamble(), &self.domain.extraction_prompt(&state))
                .await
            {
                Ok(reply) => match extract_json_object(&reply)
                    .and_then(|json| serde_json::from_str(json).ok())
                {
                    Some(data) => AnalysisOutcome::Structured { data },
                    None => {
                        warn!(stage = self.id(), "analysis reply unparsable, keeping raw text");
                        AnalysisOutcome::Degraded {
                            raw: reply,
                            error: "reply did not contain a JSON object".to_string(),
                        }
                    }
                },
                Err(err) => {
                    warn!(stage = self.id(), "reasoning engine failed: {err}");
                    AnalysisOutcome::Degraded {
                        raw: String::new(),
                        error: err.to_string(),
                    }
                }
            }
        };

        Ok(StateUpdate::structured(self.id(), outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedReasoning, item};
    use serde_json::json;

    fn outcome_of(update: &StateUpdate) -> &AnalysisOutcome {
        &update.structured_data[0].1
    }

    #[tokio::test]
    async fn empty_buckets_yield_explicit_marker() {
        let stage = DomainAnalysisStage::new(Domain::Imaging, Arc::new(ScriptedReasoning::new()));
        let update = stage.run(PipelineState::new("q")).await.unwrap();

        assert_eq!(update.structured_data[0].0, "imaging_analysis");
        assert_eq!(
            outcome_of(&update),
            &AnalysisOutcome::NoData {
                message: "No imaging data found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn populated_buckets_are_analyzed_into_structured_json() {
        let reasoning = ScriptedReasoning::new().on(
            "imaging analyst",
            r#"{"modalities": ["X-ray"], "findings": ["consolidation"]}"#,
        );
        let stage = DomainAnalysisStage::new(Domain::Imaging, Arc::new(reasoning));

        let mut state = PipelineState::new("q");
        state.imaging_data.push(item("imaging", 0.8));
        let update = stage.run(state).await.unwrap();

        assert_eq!(
            outcome_of(&update),
            &AnalysisOutcome::Structured {
                data: json!({"modalities": ["X-ray"], "findings": ["consolidation"]})
            }
        );
    }

    #[tokio::test]
    async fn unparsable_reply_degrades_with_raw_text() {
        let reasoning = ScriptedReasoning::new().on("clinical data analyst", "just prose");
        let stage = DomainAnalysisStage::new(Domain::Clinical, Arc::new(reasoning));

        let mut state = PipelineState::new("q");
        state.patient_data.push(item("clinical", 0.8));
        let update = stage.run(state).await.unwrap();

        match outcome_of(&update) {
            AnalysisOutcome::Degraded { raw, .. } => assert_eq!(raw, "just prose"),
            other => panic!("expected degraded outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reasoning_failure_degrades_instead_of_failing() {
        // No scripted reply for the lab analyst: the engine errors.
        let stage = DomainAnalysisStage::new(Domain::Lab, Arc::new(ScriptedReasoning::new()));

        let mut state = PipelineState::new("q");
        state.lab_results.push(item("clinical", 0.8));
        let update = stage.run(state).await.unwrap();

        assert!(matches!(
            outcome_of(&update),
            AnalysisOutcome::Degraded { .. }
        ));
    }
}
