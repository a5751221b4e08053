//! Locally reachable HTTP service backend (Ollama).

use super::{flatten_history, Backend, BackendError, GenerateTurn, TextStream, MAX_TOKENS, TEMPERATURE};
use async_trait::async_trait;
use futures::StreamExt;
use ollama::{GenerateRequest, Ollama};

/// Streams narration from an Ollama server running on this machine.
pub struct LocalServiceBackend {
    client: Ollama,
    label: String,
}

impl LocalServiceBackend {
    /// Create a backend for the given server URL and preferred model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Ollama::new(base_url).with_model(model),
            label: "local".to_string(),
        }
    }

    /// Pick the model to generate with: the configured one when installed,
    /// otherwise the first model the server has.
    async fn resolve_model(&self) -> String {
        let preferred = self.client.model().to_string();
        match self.client.tags().await {
            Ok(models) => {
                if models.iter().any(|m| m == &preferred) {
                    preferred
                } else {
                    models.into_iter().next().unwrap_or(preferred)
                }
            }
            Err(_) => preferred,
        }
    }
}

#[async_trait]
impl Backend for LocalServiceBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn is_available(&self) -> bool {
        self.client.is_available().await
    }

    async fn generate(&self, turn: GenerateTurn) -> Result<TextStream, BackendError> {
        let model = self.resolve_model().await;
        tracing::debug!(model, "generating via local service");

        // The generate endpoint is prompt-shaped, so the transcript is
        // flattened into the prompt ahead of the current instruction.
        let prompt = if turn.history.is_empty() {
            turn.prompt
        } else {
            format!("{}\n\n{}", flatten_history(&turn.history), turn.prompt)
        };

        let request = GenerateRequest::new(prompt)
            .with_system(turn.system)
            .with_temperature(TEMPERATURE)
            .with_max_tokens(MAX_TOKENS);

        let client = self.client.clone().with_model(model);
        let stream = client
            .generate(request)
            .await
            .map_err(|e| BackendError::Generation(e.to_string()))?;

        Ok(Box::pin(stream.map(|item| {
            item.map_err(|e| BackendError::Generation(e.to_string()))
        })))
    }
}
