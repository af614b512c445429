use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::{agent::Agent, providers::openrouter};

use med_flow::{ReasoningEngine, ReasoningError};

/// Reasoning collaborator backed by an OpenRouter-hosted model via rig.
/// Every call is bounded by a deadline.
pub struct RigReasoningEngine {
    model: String,
    deadline: Duration,
}

impl RigReasoningEngine {
    pub fn new(model: impl Into<String>, deadline: Duration) -> Self {
        Self {
            model: model.into(),
            deadline,
        }
    }

    fn agent(&self, preamble: &str) -> anyhow::Result<Agent<openrouter::CompletionModel>> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        let client = openrouter::Client::new(&api_key);
        let agent = client.agent(&self.model).preamble(preamble).build();
        Ok(agent)
    }
}

#[async_trait]
impl ReasoningEngine for RigReasoningEngine {
    async fn generate(&self, preamble: &str, prompt: &str) -> Result<String, ReasoningError> {
        let agent = self
            .agent(preamble)
            .map_err(|err| ReasoningError::Backend(err.to_string()))?;
        let reply = tokio::time::timeout(self.deadline, agent.prompt(prompt))
            .await
            .map_err(|_| ReasoningError::Timeout)?
            .map_err(|err| ReasoningError::Backend(err.to_string()))?;
        Ok(reply)
    }
}
