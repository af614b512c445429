//! Mock collaborators shared by the stage and workflow tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;

use med_flow::{ReasoningEngine, ReasoningError, RetrievedItem, SearchError, SimilaritySearch};

pub fn item(tag: &str, score: f32) -> RetrievedItem {
    let mut metadata = serde_json::Map::new();
    metadata.insert("data_type".to_string(), json!(tag));
    metadata.insert("dataset".to_string(), json!(format!("{tag}_set")));
    RetrievedItem {
        content: format!("{tag} record"),
        metadata,
        relevance_score: score,
    }
}

/// Serves a fixed candidate list (truncated to `k`) and records the queries
/// it was asked.
pub struct StaticSearch {
    items: Vec<RetrievedItem>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(items: Vec<RetrievedItem>) -> Self {
        Self {
            items,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimilaritySearch for StaticSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedItem>, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.items.iter().take(k).cloned().collect())
    }
}

/// Times out for the first `failures` calls, then serves the items.
pub struct FlakySearch {
    failures: u32,
    calls: AtomicU32,
    items: Vec<RetrievedItem>,
}

impl FlakySearch {
    pub fn new(failures: u32, items: Vec<RetrievedItem>) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            items,
        }
    }
}

#[async_trait]
impl SimilaritySearch for FlakySearch {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<RetrievedItem>, SearchError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(SearchError::Timeout)
        } else {
            Ok(self.items.iter().take(k).cloned().collect())
        }
    }
}

/// Replies keyed on a preamble fragment; anything unscripted errors. Records
/// every prompt so tests can assert what a stage actually sent.
pub struct ScriptedReasoning {
    replies: Vec<(String, String)>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self {
            replies: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, preamble_fragment: &str, reply: &str) -> Self {
        self.replies
            .push((preamble_fragment.to_string(), reply.to_string()));
        self
    }

    /// Prompts sent with a preamble matching `fragment`.
    pub fn prompts_for(&self, fragment: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(preamble, _)| preamble.contains(fragment))
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedReasoning {
    async fn generate(&self, preamble: &str, prompt: &str) -> Result<String, ReasoningError> {
        self.calls
            .lock()
            .unwrap()
            .push((preamble.to_string(), prompt.to_string()));
        self.replies
            .iter()
            .find(|(fragment, _)| preamble.contains(fragment.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| {
                ReasoningError::Backend(format!("no scripted reply for preamble: {preamble}"))
            })
    }
}
