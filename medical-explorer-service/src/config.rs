use std::path::PathBuf;
use std::time::Duration;

use med_flow::RetryPolicy;

/// Runtime settings, environment-driven with code defaults.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// Root directory the dataset paths in [`DATASET_CONFIGS`] are resolved
    /// against.
    pub data_base_path: PathBuf,
    /// Where the embedded corpus is persisted.
    pub store_path: PathBuf,
    /// OpenRouter model id used for all reasoning calls.
    pub model: String,
    pub retrieval_k: usize,
    pub search_deadline: Duration,
    pub reasoning_deadline: Duration,
    pub retry: RetryPolicy,
}

impl ExplorerConfig {
    pub fn from_env() -> Self {
        let data_base_path = std::env::var("MEDICAL_DATA_PATH")
            .unwrap_or_else(|_| "Awesome-Medical-Dataset".to_string())
            .into();
        let store_path = std::env::var("VECTOR_STORE_PATH")
            .unwrap_or_else(|_| "medical_vector_store.json".to_string())
            .into();
        let model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "openai/gpt-4.1-mini".to_string());
        let retrieval_k = env_usize("RETRIEVAL_K", 20);
        let search_deadline = Duration::from_secs(env_u64("SEARCH_DEADLINE_SECS", 30));
        let reasoning_deadline = Duration::from_secs(env_u64("REASONING_DEADLINE_SECS", 90));

        Self {
            data_base_path,
            store_path,
            model,
            retrieval_k,
            search_deadline,
            reasoning_deadline,
            retry: RetryPolicy::default(),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// One configured dataset directory and the metadata stamped on every
/// document it yields. `data_type` drives the pipeline's bucket routing;
/// tags outside the recognized set still flow through search results.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub name: &'static str,
    pub path: &'static str,
    pub data_type: &'static str,
    pub modality: &'static str,
    pub body_part: &'static str,
}

pub const DATASET_CONFIGS: &[DatasetConfig] = &[
    // Imaging
    DatasetConfig {
        name: "chest_xray14",
        path: "ChestX-ray14",
        data_type: "imaging",
        modality: "X-ray",
        body_part: "Chest",
    },
    DatasetConfig {
        name: "mimic_cxr",
        path: "MIMIC-CXR",
        data_type: "imaging",
        modality: "X-ray",
        body_part: "Chest",
    },
    DatasetConfig {
        name: "covid_chestxray",
        path: "COVID-19_Radiography_Dataset",
        data_type: "imaging",
        modality: "X-ray",
        body_part: "Chest",
    },
    DatasetConfig {
        name: "rsna_pneumonia",
        path: "rsna-pneumonia-detection-challenge",
        data_type: "imaging",
        modality: "X-ray",
        body_part: "Chest",
    },
    DatasetConfig {
        name: "brats",
        path: "BraTS",
        data_type: "imaging",
        modality: "MRI",
        body_part: "Brain",
    },
    DatasetConfig {
        name: "isic",
        path: "ISIC",
        data_type: "imaging",
        modality: "Dermatoscopy",
        body_part: "Skin",
    },
    // Clinical / EHR
    DatasetConfig {
        name: "mimic_iv",
        path: "MIMIC-IV",
        data_type: "clinical",
        modality: "EHR",
        body_part: "Multi-system",
    },
    DatasetConfig {
        name: "eicu",
        path: "eICU",
        data_type: "clinical",
        modality: "EHR",
        body_part: "Multi-system",
    },
    // Genomic
    DatasetConfig {
        name: "tcga",
        path: "TCGA",
        data_type: "genomic",
        modality: "Genomics",
        body_part: "Multi-system",
    },
    // Pathology
    DatasetConfig {
        name: "camelyon",
        path: "Camelyon",
        data_type: "pathology",
        modality: "Histopathology",
        body_part: "Lymph nodes",
    },
    // Cardiology
    DatasetConfig {
        name: "echonet",
        path: "EchoNet",
        data_type: "cardiology",
        modality: "Echocardiogram",
        body_part: "Heart",
    },
    // Ophthalmology: tagged outside the routed set on purpose, these records
    // surface through search_results only.
    DatasetConfig {
        name: "kaggle_diabetic_retinopathy",
        path: "Kaggle-Diabetic-Retinopathy",
        data_type: "ophthalmology",
        modality: "Retinal imaging",
        body_part: "Eyes",
    },
];
