//! Process-wide client configuration.
//!
//! Environment-derived defaults are read once at startup into an immutable
//! [`StreamConfig`] that is passed by reference into the session controller,
//! rather than consulted ad hoc at call sites.

use std::time::Duration;

/// Default backend base URL for local development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Streaming chat endpoint path (V3 communicate).
pub const COMMUNICATE_PATH: &str = "/api/v3/communicate";

/// Maximum upstream history entries included with a request.
pub const DEFAULT_HISTORY_MAX: usize = 20;

/// Thresholds driving quick/deep inference and wait advisories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    /// No visible content within this window infers a deep response.
    pub blank_wait_hint_ms: u64,
    /// First token later than this infers a deep response.
    pub first_token_deep_ms: u64,
    /// Deep-mode pre-hint stays visible at least this long.
    pub min_hint_display_ms: u64,
    /// Patience advisory after this long with no first token.
    pub slow_response_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            blank_wait_hint_ms: 600,
            first_token_deep_ms: 600,
            min_hint_display_ms: 400,
            slow_response_ms: 9000,
        }
    }
}

/// Immutable configuration for the streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Backend base URL, joined with [`COMMUNICATE_PATH`].
    pub base_url: String,
    /// Optional system prompt included with every request.
    pub system_prompt: Option<String>,
    /// Optional fixed model index override.
    pub llm_index: Option<i64>,
    /// Default user identity when the caller supplies none.
    pub user_id: Option<String>,
    /// Default application identity when the caller supplies none.
    pub app_id: Option<String>,
    /// Upstream history entries to include per request.
    pub history_max: usize,
    /// Inference thresholds.
    pub inference: InferenceConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            system_prompt: None,
            llm_index: None,
            user_id: None,
            app_id: None,
            history_max: DEFAULT_HISTORY_MAX,
            inference: InferenceConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend base URL (builder pattern).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the system prompt (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the model index override (builder pattern).
    pub fn with_llm_index(mut self, index: i64) -> Self {
        self.llm_index = Some(index);
        self
    }

    /// Set the default user identity (builder pattern).
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the default app identity (builder pattern).
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set the inference thresholds (builder pattern).
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    /// Read configuration from `MEDGO_*` environment variables once.
    ///
    /// Invalid numeric values are logged and ignored rather than failing
    /// startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MEDGO_API_URL") {
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        if let Ok(prompt) = std::env::var("MEDGO_SYSTEM_PROMPT") {
            if !prompt.is_empty() {
                config.system_prompt = Some(prompt);
            }
        }
        if let Some(index) = env_number("MEDGO_LLM_INDEX") {
            config.llm_index = Some(index);
        }
        if let Ok(user_id) = std::env::var("MEDGO_USER_ID") {
            if !user_id.is_empty() {
                config.user_id = Some(user_id);
            }
        }
        if let Ok(app_id) = std::env::var("MEDGO_APP_ID") {
            if !app_id.is_empty() {
                config.app_id = Some(app_id);
            }
        }

        if let Some(ms) = env_number("MEDGO_BLANK_WAIT_HINT_MS") {
            config.inference.blank_wait_hint_ms = ms as u64;
        }
        if let Some(ms) = env_number("MEDGO_FIRST_TOKEN_DEEP_MS") {
            config.inference.first_token_deep_ms = ms as u64;
        }
        if let Some(ms) = env_number("MEDGO_MIN_HINT_DISPLAY_MS") {
            config.inference.min_hint_display_ms = ms as u64;
        }
        if let Some(ms) = env_number("MEDGO_SLOW_RESPONSE_MS") {
            config.inference.slow_response_ms = ms as u64;
        }

        config
    }

    /// Full URL of the streaming chat endpoint.
    pub fn communicate_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), COMMUNICATE_PATH)
    }

    /// Blank-wait threshold as a [`Duration`].
    pub fn blank_wait_hint(&self) -> Duration {
        Duration::from_millis(self.inference.blank_wait_hint_ms)
    }

    /// Slow-response threshold as a [`Duration`].
    pub fn slow_response(&self) -> Duration {
        Duration::from_millis(self.inference.slow_response_ms)
    }
}

fn env_number(key: &str) -> Option<i64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric environment value");
            None
        }
    }
}
