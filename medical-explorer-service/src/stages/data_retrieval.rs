use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use med_flow::{
    DataType, Field, FlowError, PipelineState, Result, RetrievedItem, RetryPolicy, SearchError,
    SimilaritySearch, Stage, StateUpdate, retry_with_backoff,
};

/// Tuning for the single similarity-search call.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub k: usize,
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 20,
            deadline: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// The effective search string: joined extracted terms, or the raw query when
/// extraction produced none.
fn effective_search_string(state: &PipelineState) -> String {
    match &state.query_analysis {
        Some(analysis) if !analysis.search_terms.is_empty() => analysis.search_terms.join(" "),
        _ => state.query.clone(),
    }
}

/// Route one candidate into the update. Every candidate lands in
/// search_results in arrival order; recognized tags land in their domain
/// bucket as well, unrecognized ones nowhere else.
fn route_item(update: &mut StateUpdate, item: RetrievedItem) {
    update.search_results.push(item.clone());
    match item.data_type() {
        Some(DataType::Clinical) => {
            update.patient_data.push(item.clone());
            update.clinical_notes.push(item);
        }
        Some(DataType::Imaging) => update.imaging_data.push(item),
        Some(DataType::Genomic) => update.genomic_data.push(item),
        Some(DataType::Pathology) => update.pathology_data.push(item),
        Some(DataType::Cardiology) => update.cardiology_data.push(item),
        None => {}
    }
}

/// Performs the one similarity search of the run and fans the candidates out
/// into the domain buckets. Search unavailability is fatal: without retrieval
/// there is nothing to analyze.
pub struct DataRetrievalStage {
    search: Arc<dyn SimilaritySearch>,
    config: RetrievalConfig,
}

impl DataRetrievalStage {
    pub fn new(search: Arc<dyn SimilaritySearch>, config: RetrievalConfig) -> Self {
        Self { search, config }
    }
}

#[async_trait]
impl Stage for DataRetrievalStage {
    fn id(&self) -> &str {
        "data_retrieval"
    }

    fn write_set(&self) -> &'static [Field] {
        &[
            Field::PatientData,
            Field::ClinicalNotes,
            Field::ImagingData,
            Field::LabResults,
            Field::GenomicData,
            Field::PathologyData,
            Field::CardiologyData,
            Field::SearchResults,
        ]
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate> {
        let search_string = effective_search_string(&state);
        info!(
            stage = self.id(),
            k = self.config.k,
            search = %search_string,
            "retrieving candidates"
        );

        let candidates = retry_with_backoff(self.config.retry, SearchError::is_transient, || {
            let search = self.search.clone();
            let query = search_string.clone();
            let k = self.config.k;
            let deadline = self.config.deadline;
            async move {
                match tokio::time::timeout(deadline, search.search(&query, k)).await {
                    Ok(result) => result,
                    Err(_) => Err(SearchError::Timeout),
                }
            }
        })
        .await
        .map_err(|err| FlowError::Retrieval(err.to_string()))?;

        info!(
            stage = self.id(),
            candidates = candidates.len(),
            "retrieval complete"
        );

        let mut update = StateUpdate::default();
        for item in candidates {
            route_item(&mut update, item);
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakySearch, StaticSearch, item};
    use med_flow::QueryAnalysis;

    fn fast_config() -> RetrievalConfig {
        RetrievalConfig {
            k: 20,
            deadline: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
            },
        }
    }

    fn state_with_terms(terms: &[&str]) -> PipelineState {
        let mut state = PipelineState::new("raw query");
        state.query_analysis = Some(QueryAnalysis {
            search_terms: terms.iter().map(|t| t.to_string()).collect(),
            ..QueryAnalysis::default()
        });
        state
    }

    #[test]
    fn search_string_joins_terms_or_falls_back_to_query() {
        assert_eq!(
            effective_search_string(&state_with_terms(&["chest pain", "cardiac"])),
            "chest pain cardiac"
        );
        assert_eq!(
            effective_search_string(&state_with_terms(&[])),
            "raw query"
        );
        assert_eq!(
            effective_search_string(&PipelineState::new("raw query")),
            "raw query"
        );
    }

    #[tokio::test]
    async fn candidates_are_routed_exactly_once() {
        let items = vec![
            item("clinical", 0.9),
            item("imaging", 0.8),
            item("genomic", 0.7),
            item("pathology", 0.6),
            item("cardiology", 0.5),
            item("ophthalmology", 0.4),
        ];
        let stage = DataRetrievalStage::new(
            Arc::new(StaticSearch::new(items)),
            fast_config(),
        );

        let update = stage.run(PipelineState::new("q")).await.unwrap();

        // Everything appears in search_results exactly once, in order.
        assert_eq!(update.search_results.len(), 6);
        let scores: Vec<f32> = update
            .search_results
            .iter()
            .map(|i| i.relevance_score)
            .collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7, 0.6, 0.5, 0.4]);

        // Clinical lands in both clinical buckets; each other recognized tag
        // in its own; the unrecognized tag in none.
        assert_eq!(update.patient_data.len(), 1);
        assert_eq!(update.clinical_notes.len(), 1);
        assert_eq!(update.imaging_data.len(), 1);
        assert_eq!(update.genomic_data.len(), 1);
        assert_eq!(update.pathology_data.len(), 1);
        assert_eq!(update.cardiology_data.len(), 1);
        assert!(update.lab_results.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let search = FlakySearch::new(2, vec![item("clinical", 0.9)]);
        let stage = DataRetrievalStage::new(Arc::new(search), fast_config());

        let update = stage.run(PipelineState::new("q")).await.unwrap();
        assert_eq!(update.search_results.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_become_a_fatal_retrieval_error() {
        // Times out on every attempt.
        let search = FlakySearch::new(u32::MAX, Vec::new());
        let stage = DataRetrievalStage::new(Arc::new(search), fast_config());

        let err = stage.run(PipelineState::new("q")).await.unwrap_err();
        assert!(matches!(err, FlowError::Retrieval(_)));
    }
}
