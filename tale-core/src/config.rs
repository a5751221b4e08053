//! Engine configuration.
//!
//! Everything comes from the environment with workable defaults, so the
//! binary runs with no setup when an Ollama server is on the machine.

use std::path::PathBuf;

/// Default URL for the local generation service.
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434";

/// Default model for the local generation service.
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

/// Configuration for building a [`crate::StoryEngine`].
#[derive(Debug, Clone)]
pub struct StoryConfig {
    /// Base URL of the locally reachable generation service.
    pub local_url: String,

    /// Preferred model on the local service.
    pub local_model: String,

    /// When false, the local service is demoted below the resident engine
    /// in the preference order.
    pub prefer_local: bool,

    /// Endpoint of the remote hosted fallback; no hosted backend when unset.
    pub hosted_url: Option<String>,

    /// Persistent player identity woven into prompts and forwarded to the
    /// hosted backend.
    pub identity: Option<String>,

    /// Where the session store persists; in-memory only when unset.
    pub data_path: Option<PathBuf>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            local_url: DEFAULT_LOCAL_URL.to_string(),
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            prefer_local: true,
            hosted_url: None,
            identity: None,
            data_path: None,
        }
    }
}

impl StoryConfig {
    /// Read configuration from the environment.
    ///
    /// Recognized variables: `LOCAL_LLM_URL`, `LOCAL_LLM_MODEL`,
    /// `PREFER_LOCAL_LLM`, `HOSTED_API_URL`, `PLAYER_IDENTITY`,
    /// `TALE_DATA_FILE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            local_url: std::env::var("LOCAL_LLM_URL").unwrap_or(defaults.local_url),
            local_model: std::env::var("LOCAL_LLM_MODEL").unwrap_or(defaults.local_model),
            prefer_local: std::env::var("PREFER_LOCAL_LLM")
                .map(|v| v != "false")
                .unwrap_or(true),
            hosted_url: std::env::var("HOSTED_API_URL").ok(),
            identity: std::env::var("PLAYER_IDENTITY").ok(),
            data_path: std::env::var("TALE_DATA_FILE").ok().map(PathBuf::from),
        }
    }

    pub fn with_local_url(mut self, url: impl Into<String>) -> Self {
        self.local_url = url.into();
        self
    }

    pub fn with_local_model(mut self, model: impl Into<String>) -> Self {
        self.local_model = model.into();
        self
    }

    pub fn with_prefer_local(mut self, prefer: bool) -> Self {
        self.prefer_local = prefer;
        self
    }

    pub fn with_hosted_url(mut self, url: impl Into<String>) -> Self {
        self.hosted_url = Some(url.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }
}
