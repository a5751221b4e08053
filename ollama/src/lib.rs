//! Minimal Ollama API client.
//!
//! This crate provides a focused client for a locally running Ollama
//! server with:
//! - A cheap, time-bounded availability probe
//! - Installed-model listing
//! - Streaming generation with incremental NDJSON parsing

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

/// Default base URL for a local Ollama server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model to generate with.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// How long the availability probe is allowed to take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors that can occur when using the Ollama client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Ollama API client.
#[derive(Clone)]
pub struct Ollama {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl Ollama {
    /// Create a new client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            probe_client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .connect_timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Set the model used for generation.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The model this client generates with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check whether the server is reachable.
    ///
    /// Bounded by a short timeout and guaranteed not to fail: any error
    /// (connection refused, timeout, bad status) reads as "not available".
    pub async fn is_available(&self) -> bool {
        match self
            .probe_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// List the names of installed models.
    pub async fn tags(&self) -> Result<Vec<String>, Error> {
        let response = self
            .probe_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Send a generation request and stream the text deltas.
    ///
    /// The response body is newline-delimited JSON; each line carries a
    /// `response` delta. Lines that fail to parse are skipped, matching the
    /// server's occasional habit of interleaving keep-alive noise.
    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>, Error> {
        let api_request = ApiGenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt,
            system: request.system,
            stream: true,
            options: ApiOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        // Scan keeps a buffer so a JSON line split across two chunks is
        // reassembled before parsing.
        let stream = response
            .bytes_stream()
            .scan(String::new(), |buffer, result| {
                let deltas = match result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_ndjson_lines(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(deltas))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }
}

impl Default for Ollama {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// A generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    /// Create a request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiGenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Parse complete NDJSON lines out of the buffer, leaving any trailing
/// partial line in place for the next chunk.
fn drain_ndjson_lines(buffer: &mut String) -> Vec<Result<String, Error>> {
    let mut deltas = Vec::new();

    while let Some(newline_pos) = buffer.find('\n') {
        let line = buffer[..newline_pos].trim().to_string();
        buffer.drain(..=newline_pos);

        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ApiGenerateChunk>(&line) {
            Ok(chunk) => {
                if !chunk.response.is_empty() {
                    deltas.push(Ok(chunk.response));
                }
                if chunk.done {
                    break;
                }
            }
            // Non-JSON lines are skipped rather than failing the stream.
            Err(_) => continue,
        }
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Ollama::new("http://localhost:11434/");
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_client_with_model() {
        let client = Ollama::default().with_model("mistral");
        assert_eq!(client.model(), "mistral");
    }

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new("Hello")
            .with_system("You are a narrator")
            .with_temperature(0.8)
            .with_max_tokens(1024);

        assert_eq!(request.prompt, "Hello");
        assert!(request.system.is_some());
        assert_eq!(request.temperature, Some(0.8));
        assert_eq!(request.max_tokens, Some(1024));
    }

    #[test]
    fn test_drain_complete_lines() {
        let mut buffer = String::from(
            "{\"response\":\"You wake\",\"done\":false}\n{\"response\":\" in ash\",\"done\":false}\n",
        );
        let deltas: Vec<_> = drain_ndjson_lines(&mut buffer)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(deltas, vec!["You wake", " in ash"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_keeps_partial_line() {
        let mut buffer =
            String::from("{\"response\":\"complete\",\"done\":false}\n{\"response\":\"par");
        let deltas: Vec<_> = drain_ndjson_lines(&mut buffer)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(deltas, vec!["complete"]);
        assert_eq!(buffer, "{\"response\":\"par");
    }

    #[test]
    fn test_drain_skips_invalid_lines() {
        let mut buffer = String::from("not json\n{\"response\":\"ok\",\"done\":false}\n");
        let deltas: Vec<_> = drain_ndjson_lines(&mut buffer)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(deltas, vec!["ok"]);
    }

    #[test]
    fn test_drain_stops_at_done() {
        let mut buffer = String::from(
            "{\"response\":\"end.\",\"done\":true}\n{\"response\":\"extra\",\"done\":false}\n",
        );
        let deltas: Vec<_> = drain_ndjson_lines(&mut buffer)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(deltas, vec!["end."]);
    }
}
