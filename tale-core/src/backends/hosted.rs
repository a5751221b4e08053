//! Remote hosted fallback backend.
//!
//! Reached through the host application's own server rather than a model
//! provider directly. The server picks whichever provider it has configured
//! and reports the choice in response headers.

use super::{Backend, BackendError, GenerateTurn, TextStream};
use crate::message::Role;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;

/// How long the availability probe is allowed to take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Streams narration from the host application's story endpoint.
pub struct HostedBackend {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    url: String,
    identity: Option<String>,
    label: String,
}

impl HostedBackend {
    /// Create a backend for the given endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
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
            url: url.into().trim_end_matches('/').to_string(),
            identity: None,
            label: "hosted".to_string(),
        }
    }

    /// Forward a persistent identity with every request.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct StoryRequest {
    action: &'static str,
    #[serde(rename = "playerAction", skip_serializing_if = "Option::is_none")]
    player_action: Option<String>,
    history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    role: &'static str,
    content: String,
}

#[async_trait]
impl Backend for HostedBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn is_available(&self) -> bool {
        match self
            .probe_client
            .get(format!("{}/status", self.url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(&self, turn: GenerateTurn) -> Result<TextStream, BackendError> {
        let history = turn
            .history
            .iter()
            .filter_map(|m| match m.role {
                Role::Narrator => Some(HistoryEntry {
                    role: "narrator",
                    content: m.content.clone(),
                }),
                Role::Player => Some(HistoryEntry {
                    role: "player",
                    content: m.content.clone(),
                }),
                Role::System => None,
            })
            .collect();

        let request = StoryRequest {
            action: turn.kind.wire_action(),
            player_action: match turn.kind {
                super::TurnKind::Start => None,
                super::TurnKind::Continue | super::TurnKind::Extract => Some(turn.prompt.clone()),
            },
            history,
            identity: self.identity.clone(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Generation(format!(
                "hosted endpoint returned status {}",
                response.status()
            )));
        }

        // The server reports which provider actually serviced the request;
        // attribution only, never dispatch.
        let provider = header_string(&response, "X-LLM-Provider");
        let model = header_string(&response, "X-LLM-Model");
        tracing::debug!(?provider, ?model, "generating via hosted fallback");

        let stream = response
            .bytes_stream()
            .map(|item| match item {
                Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => Err(BackendError::Generation(e.to_string())),
            });

        Ok(Box::pin(stream))
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
