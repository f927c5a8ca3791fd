//! Outgoing request payload for `/api/v3/communicate`.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Speaker role in the upstream transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One prior transcript entry sent as request context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: String,
}

impl UpstreamMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request body for a streaming chat turn.
///
/// Optional fields are omitted from the JSON body entirely rather than sent
/// as `null`; the backend treats absence and `null` differently for some of
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicateRequest {
    /// The user's prompt for this turn.
    pub user: String,
    /// Always `true`; the endpoint also serves non-streaming callers.
    pub stream: bool,
    pub conversation_id: String,
    pub conversation_root_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Prior transcript, oldest first, capped by the caller.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub messages: Vec<UpstreamMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl CommunicateRequest {
    /// Build a request for one turn from the session identity.
    pub fn new(prompt: impl Into<String>, identity: &Identity) -> Self {
        Self {
            user: prompt.into(),
            stream: true,
            conversation_id: identity.conversation_id.clone(),
            conversation_root_id: identity.conversation_root_id.clone(),
            session_id: identity.session_id.clone(),
            user_id: identity.user_id.clone(),
            app_id: identity.app_id.clone(),
            system: None,
            messages: Vec::new(),
            llm_index: None,
            agent_mode: None,
            image_url: None,
        }
    }

    /// Set the system prompt (builder pattern).
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the prior transcript (builder pattern).
    pub fn with_messages(mut self, messages: Vec<UpstreamMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the model index override (builder pattern).
    pub fn with_llm_index(mut self, index: i64) -> Self {
        self.llm_index = Some(index);
        self
    }

    /// Set the agent mode hint (builder pattern).
    pub fn with_agent_mode(mut self, mode: impl Into<String>) -> Self {
        self.agent_mode = Some(mode.into());
        self
    }

    /// Attach an image by URL (builder pattern).
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}
