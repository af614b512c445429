use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::DatasetConfig;

/// A corpus document ready for embedding: page content plus the metadata
/// contract the pipeline routes on (dataset, data_type, modality, body_part,
/// source locator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub content: String,
    pub metadata: serde_json::Map<String, Value>,
}

const CLINICAL_PRIORITY_FIELDS: &[&str] = &[
    "patient_id",
    "age",
    "gender",
    "diagnosis",
    "symptoms",
    "lab_results",
    "medications",
    "treatment",
    "outcome",
];

const GENOMIC_FIELDS: &[&str] = &[
    "gene",
    "mutation",
    "expression",
    "variant",
    "chromosome",
    "position",
    "sample_id",
    "cancer_type",
];

const PATHOLOGY_FIELDS: &[&str] = &[
    "slide_id",
    "tissue_type",
    "diagnosis",
    "malignancy",
    "grade",
    "stage",
    "patient_id",
];

/// Load every configured dataset under `base`. An unreachable or broken
/// dataset is logged and skipped; the pipeline simply sees a smaller corpus.
pub fn load_all_datasets(base: &Path, configs: &[DatasetConfig]) -> Vec<CorpusDocument> {
    let mut documents = Vec::new();
    for config in configs {
        let dataset_path = base.join(config.path);
        if !dataset_path.exists() {
            warn!(
                dataset = config.name,
                path = %dataset_path.display(),
                "dataset path not found, skipping"
            );
            continue;
        }
        let docs = load_dataset(&dataset_path, config);
        info!(dataset = config.name, documents = docs.len(), "dataset loaded");
        documents.extend(docs);
    }
    documents
}

fn load_dataset(path: &Path, config: &DatasetConfig) -> Vec<CorpusDocument> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        let file = entry.path();
        let result = match file.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => load_csv_file(file, config, &mut documents),
            Some("tsv") => load_csv_file(file, config, &mut documents),
            Some("json") => load_json_file(file, config, &mut documents),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(file = %file.display(), "error processing file: {err:#}");
        }
    }
    documents
}

fn load_csv_file(
    file: &Path,
    config: &DatasetConfig,
    documents: &mut Vec<CorpusDocument>,
) -> Result<()> {
    let delimiter = if file.extension().and_then(|e| e.to_str()) == Some("tsv") {
        b'\t'
    } else {
        b','
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(file)?;
    let headers = reader.headers()?.clone();

    for (row_index, record) in reader.records().enumerate() {
        let record = record?;
        let fields: Vec<(&str, &str)> = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();

        let content = match config.data_type {
            "clinical" => keyed_content(
                format!("Clinical Data from {}", config.name),
                CLINICAL_PRIORITY_FIELDS,
                &fields,
            ),
            "genomic" => keyed_content(
                format!("Genomic Data from {}", config.name),
                GENOMIC_FIELDS,
                &fields,
            ),
            "pathology" => keyed_content(
                format!("Pathology Data from {}", config.name),
                PATHOLOGY_FIELDS,
                &fields,
            ),
            // Imaging, cardiology and everything else share the same shape.
            _ => imaging_content(config, &fields),
        };

        let mut metadata = base_metadata(config, file);
        metadata.insert("row_index".to_string(), json!(row_index));
        documents.push(CorpusDocument { content, metadata });
    }
    Ok(())
}

fn load_json_file(
    file: &Path,
    config: &DatasetConfig,
    documents: &mut Vec<CorpusDocument>,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let data: Value = serde_json::from_str(&raw)?;
    let content = format!(
        "Data from {}: {}",
        config.name,
        serde_json::to_string_pretty(&data)?
    );
    documents.push(CorpusDocument {
        content,
        metadata: base_metadata(config, file),
    });
    Ok(())
}

/// Priority fields first, remaining populated columns after, one line each.
fn keyed_content(header: String, priority: &[&str], fields: &[(&str, &str)]) -> String {
    let mut lines = vec![header];
    for name in priority {
        if let Some((_, value)) = fields.iter().find(|(col, _)| col == name) {
            lines.push(format!("{name}: {value}"));
        }
    }
    for (col, value) in fields {
        if !priority.contains(col) {
            lines.push(format!("{col}: {value}"));
        }
    }
    lines.join("\n")
}

fn imaging_content(config: &DatasetConfig, fields: &[(&str, &str)]) -> String {
    let mut lines = vec![
        format!("Dataset: {}", config.name),
        format!("Modality: {}", config.modality),
        format!("Body Part: {}", config.body_part),
    ];
    for (col, value) in fields {
        lines.push(format!("{col}: {value}"));
    }
    lines.join("\n")
}

fn base_metadata(config: &DatasetConfig, source_file: &Path) -> serde_json::Map<String, Value> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("dataset".to_string(), json!(config.name));
    metadata.insert("data_type".to_string(), json!(config.data_type));
    metadata.insert("modality".to_string(), json!(config.modality));
    metadata.insert("body_part".to_string(), json!(config.body_part));
    metadata.insert(
        "source_file".to_string(),
        json!(source_file.display().to_string()),
    );
    metadata
}
