use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Closed set of corpus data types the pipeline routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Imaging,
    Clinical,
    Genomic,
    Pathology,
    Cardiology,
}

impl DataType {
    /// Parse a metadata tag. Unknown tags yield `None`, never an error, so
    /// untagged records still flow through search_results.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "imaging" => Some(Self::Imaging),
            "clinical" => Some(Self::Clinical),
            "genomic" => Some(Self::Genomic),
            "pathology" => Some(Self::Pathology),
            "cardiology" => Some(Self::Cardiology),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imaging => "imaging",
            Self::Clinical => "clinical",
            Self::Genomic => "genomic",
            Self::Pathology => "pathology",
            Self::Cardiology => "cardiology",
        }
    }
}

/// One record produced by the similarity search. Immutable once retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub content: String,
    pub metadata: serde_json::Map<String, Value>,
    /// Real similarity score mapped into [0, 1], as reported by the search.
    pub relevance_score: f32,
}

impl RetrievedItem {
    pub fn data_type(&self) -> Option<DataType> {
        self.metadata
            .get("data_type")
            .and_then(Value::as_str)
            .and_then(DataType::from_tag)
    }

    pub fn dataset(&self) -> &str {
        self.metadata
            .get("dataset")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }
}

/// Structured extraction from the raw query. Produced once by the query
/// analyzer, read-only afterwards. All fields are defaulted so a partial
/// extraction still deserializes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub lab_tests: Vec<String>,
    #[serde(default)]
    pub imaging_studies: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub demographics: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub data_types_needed: Vec<DataType>,
    #[serde(default)]
    pub search_terms: Vec<String>,
}

impl QueryAnalysis {
    /// Fallback analysis used when extraction fails: every categorical field
    /// empty and the raw query as the only search term, so retrieval is
    /// never blocked.
    pub fn fallback(query: &str) -> Self {
        Self {
            search_terms: vec![query.to_string()],
            ..Self::default()
        }
    }
}

/// Value committed under a structured_data key. Absence of data and degraded
/// analyses are explicit markers, never missing keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Parsed structured extraction from the reasoning engine.
    Structured { data: Value },
    /// The domain buckets held no records.
    NoData { message: String },
    /// The reasoning call failed or returned something unparsable; the raw
    /// reply is kept for diagnostics.
    Degraded { raw: String, error: String },
}

/// Every writable field of [`PipelineState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    QueryAnalysis,
    PatientData,
    ClinicalNotes,
    ImagingData,
    LabResults,
    GenomicData,
    PathologyData,
    CardiologyData,
    SearchResults,
    StructuredData,
    FinalResponse,
}

/// How a field absorbs a stage's write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Items are appended in arrival order; nothing is removed or reordered.
    Append,
    /// Key-disjoint insert; a colliding key fails loudly.
    DisjointInsert,
    /// Written exactly once; a second write fails loudly.
    WriteOnce,
}

impl Field {
    /// Declared per-field merge policy. This table is the single place merge
    /// behavior is defined; `PipelineState::apply` enforces it.
    pub fn merge_policy(self) -> MergePolicy {
        match self {
            Field::QueryAnalysis | Field::FinalResponse => MergePolicy::WriteOnce,
            Field::StructuredData => MergePolicy::DisjointInsert,
            Field::PatientData
            | Field::ClinicalNotes
            | Field::ImagingData
            | Field::LabResults
            | Field::GenomicData
            | Field::PathologyData
            | Field::CardiologyData
            | Field::SearchResults => MergePolicy::Append,
        }
    }
}

/// The single shared accumulator threaded through a pipeline run. Created
/// once per query, mutated only through [`PipelineState::apply`], discarded
/// after `final_response` is consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    /// Raw query; set once at the start, never mutated.
    pub query: String,
    pub query_analysis: Option<QueryAnalysis>,
    pub patient_data: Vec<RetrievedItem>,
    pub clinical_notes: Vec<RetrievedItem>,
    pub imaging_data: Vec<RetrievedItem>,
    pub lab_results: Vec<RetrievedItem>,
    pub genomic_data: Vec<RetrievedItem>,
    pub pathology_data: Vec<RetrievedItem>,
    pub cardiology_data: Vec<RetrievedItem>,
    /// Full retrieval result in original relevance order.
    pub search_results: Vec<RetrievedItem>,
    pub structured_data: BTreeMap<String, AnalysisOutcome>,
    pub final_response: Option<String>,
}

impl PipelineState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Merge one stage's partial update, enforcing the declared per-field
    /// policies. The merge is atomic: conflicts are detected before any
    /// mutation, so a rejected update leaves the state untouched.
    pub fn apply(&mut self, update: StateUpdate) -> Result<()> {
        if update.query_analysis.is_some() && self.query_analysis.is_some() {
            return Err(FlowError::WriteConflict(Field::QueryAnalysis));
        }
        if update.final_response.is_some() && self.final_response.is_some() {
            return Err(FlowError::WriteConflict(Field::FinalResponse));
        }
        let mut incoming_keys = std::collections::HashSet::new();
        for (key, _) in &update.structured_data {
            if self.structured_data.contains_key(key) || !incoming_keys.insert(key.clone()) {
                return Err(FlowError::KeyCollision(key.clone()));
            }
        }

        if let Some(analysis) = update.query_analysis {
            self.query_analysis = Some(analysis);
        }
        if let Some(response) = update.final_response {
            self.final_response = Some(response);
        }
        for (key, outcome) in update.structured_data {
            self.structured_data.insert(key, outcome);
        }
        self.patient_data.extend(update.patient_data);
        self.clinical_notes.extend(update.clinical_notes);
        self.imaging_data.extend(update.imaging_data);
        self.lab_results.extend(update.lab_results);
        self.genomic_data.extend(update.genomic_data);
        self.pathology_data.extend(update.pathology_data);
        self.cardiology_data.extend(update.cardiology_data);
        self.search_results.extend(update.search_results);
        Ok(())
    }
}

/// Partial write returned by a stage. The scheduler merges it into the shared
/// state on the stage's behalf and audits it against the stage's declared
/// write-set.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub query_analysis: Option<QueryAnalysis>,
    pub patient_data: Vec<RetrievedItem>,
    pub clinical_notes: Vec<RetrievedItem>,
    pub imaging_data: Vec<RetrievedItem>,
    pub lab_results: Vec<RetrievedItem>,
    pub genomic_data: Vec<RetrievedItem>,
    pub pathology_data: Vec<RetrievedItem>,
    pub cardiology_data: Vec<RetrievedItem>,
    pub search_results: Vec<RetrievedItem>,
    pub structured_data: Vec<(String, AnalysisOutcome)>,
    pub final_response: Option<String>,
}

impl StateUpdate {
    pub fn query_analysis(analysis: QueryAnalysis) -> Self {
        Self {
            query_analysis: Some(analysis),
            ..Self::default()
        }
    }

    pub fn structured(key: impl Into<String>, outcome: AnalysisOutcome) -> Self {
        Self {
            structured_data: vec![(key.into(), outcome)],
            ..Self::default()
        }
    }

    pub fn final_response(response: impl Into<String>) -> Self {
        Self {
            final_response: Some(response.into()),
            ..Self::default()
        }
    }

    /// Fields this update actually writes; checked against the writing
    /// stage's declared write-set before the merge.
    pub fn touched_fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.query_analysis.is_some() {
            fields.push(Field::QueryAnalysis);
        }
        if !self.patient_data.is_empty() {
            fields.push(Field::PatientData);
        }
        if !self.clinical_notes.is_empty() {
            fields.push(Field::ClinicalNotes);
        }
        if !self.imaging_data.is_empty() {
            fields.push(Field::ImagingData);
        }
        if !self.lab_results.is_empty() {
            fields.push(Field::LabResults);
        }
        if !self.genomic_data.is_empty() {
            fields.push(Field::GenomicData);
        }
        if !self.pathology_data.is_empty() {
            fields.push(Field::PathologyData);
        }
        if !self.cardiology_data.is_empty() {
            fields.push(Field::CardiologyData);
        }
        if !self.search_results.is_empty() {
            fields.push(Field::SearchResults);
        }
        if !self.structured_data.is_empty() {
            fields.push(Field::StructuredData);
        }
        if self.final_response.is_some() {
            fields.push(Field::FinalResponse);
        }
        fields
    }
}
