use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use med_flow::{RetrievedItem, SearchError, SimilaritySearch};

use crate::corpus::CorpusDocument;

/// One embedded corpus document, as persisted in the store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    built_at: String,
    documents: Vec<EmbeddedDocument>,
}

/// In-memory vector store over the embedded corpus; the pipeline's
/// similarity-search collaborator.
pub struct VectorStore {
    documents: Vec<EmbeddedDocument>,
}

/// Outcome of loading a persisted store. The caller rebuilds on `NotFound`
/// and `Corrupt`; any other I/O problem surfaces as an error instead of
/// silently triggering an expensive rebuild.
pub enum StoreLoad {
    Loaded(VectorStore),
    NotFound,
    Corrupt(String),
}

impl VectorStore {
    /// Embed the corpus and build a fresh store.
    pub async fn build(documents: Vec<CorpusDocument>) -> anyhow::Result<Self> {
        info!(documents = documents.len(), "embedding corpus documents");
        let texts: Vec<String> = documents.iter().map(|doc| doc.content.clone()).collect();
        let embeddings = embed_texts(texts).await?;
        let documents = documents
            .into_iter()
            .zip(embeddings)
            .map(|(doc, embedding)| EmbeddedDocument {
                content: doc.content,
                metadata: doc.metadata,
                embedding,
            })
            .collect();
        Ok(Self { documents })
    }

    pub fn from_documents(documents: Vec<EmbeddedDocument>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = StoreFile {
            built_at: chrono::Utc::now().to_rfc3339(),
            documents: self.documents.clone(),
        };
        std::fs::write(path, serde_json::to_vec(&file)?)?;
        info!(path = %path.display(), documents = self.documents.len(), "vector store saved");
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<StoreLoad> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoreLoad::NotFound),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<StoreFile>(&raw) {
            Ok(file) => Ok(StoreLoad::Loaded(Self {
                documents: file.documents,
            })),
            Err(err) => Ok(StoreLoad::Corrupt(err.to_string())),
        }
    }

    /// Rank the corpus against a query embedding. Cosine similarity is mapped
    /// affinely into [0, 1] and carried as the item's relevance score.
    fn rank(&self, query_embedding: &[f32], k: usize) -> Vec<RetrievedItem> {
        let mut scored: Vec<(f32, &EmbeddedDocument)> = self
            .documents
            .iter()
            .map(|doc| (cosine_similarity(query_embedding, &doc.embedding), doc))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(score, doc)| RetrievedItem {
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                relevance_score: ((score + 1.0) / 2.0).clamp(0.0, 1.0),
            })
            .collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Embed texts with the local ONNX model. Inference is off-loaded to a
/// blocking thread so it does not obstruct Tokio's async scheduler.
async fn embed_texts(texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
    tokio::task::spawn_blocking(move || {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let mut model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )?;
        let embeddings = model.embed(texts, None)?;
        Ok::<Vec<Vec<f32>>, anyhow::Error>(embeddings)
    })
    .await?
}

#[async_trait]
impl SimilaritySearch for VectorStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedItem>, SearchError> {
        let embedding = embed_texts(vec![query.to_string()])
            .await
            .map_err(|err| SearchError::Backend(err.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Backend("embedding produced no output".to_string()))?;
        Ok(self.rank(&embedding, k))
    }
}
