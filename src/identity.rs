//! Conversation identity management.
//!
//! A session holds a stable set of identifiers that travel with every
//! request. The conversation root never changes for the lifetime of the
//! session; the backend may correct the conversation id via the `route`
//! event on the first turn, and the corrected id is used from then on.

use uuid::Uuid;

use crate::events::RouteInfo;

/// Identifiers attached to every outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Current conversation id; may be corrected by the backend.
    pub conversation_id: String,
    /// Root conversation id; fixed at session creation.
    pub conversation_root_id: String,
    /// Client session id; fixed at session creation.
    pub session_id: String,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Calling application, when known.
    pub app_id: Option<String>,
}

impl Identity {
    /// Mint a fresh identity with random conversation and session ids.
    pub fn generate() -> Self {
        let conversation_id = Uuid::new_v4().to_string();
        Self {
            conversation_root_id: conversation_id.clone(),
            conversation_id,
            session_id: Uuid::new_v4().to_string(),
            user_id: None,
            app_id: None,
        }
    }

    /// Set the acting user (builder pattern).
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the calling application (builder pattern).
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Apply a backend route correction.
    ///
    /// Returns `true` when the conversation id actually changed. The root id
    /// is never rewritten, so the original thread stays addressable.
    pub fn apply_route(&mut self, route: &RouteInfo) -> bool {
        match &route.conversation_id {
            Some(corrected) if !corrected.is_empty() && *corrected != self.conversation_id => {
                tracing::debug!(
                    from = %self.conversation_id,
                    to = %corrected,
                    "conversation id corrected by backend"
                );
                self.conversation_id = corrected.clone();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_root_matches_initial_conversation() {
        let identity = Identity::generate();
        assert_eq!(identity.conversation_id, identity.conversation_root_id);
        assert_ne!(identity.conversation_id, identity.session_id);
    }

    #[test]
    fn test_generated_identities_are_distinct() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.conversation_id, b.conversation_id);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_route_correction_updates_conversation_only() {
        let mut identity = Identity::generate();
        let root = identity.conversation_root_id.clone();
        let route = RouteInfo {
            conversation_id: Some("conv-corrected".into()),
            ..Default::default()
        };
        assert!(identity.apply_route(&route));
        assert_eq!(identity.conversation_id, "conv-corrected");
        assert_eq!(identity.conversation_root_id, root);
    }

    #[test]
    fn test_route_without_correction_is_noop() {
        let mut identity = Identity::generate();
        let original = identity.conversation_id.clone();

        assert!(!identity.apply_route(&RouteInfo::default()));
        assert!(!identity.apply_route(&RouteInfo {
            conversation_id: Some(String::new()),
            ..Default::default()
        }));
        assert!(!identity.apply_route(&RouteInfo {
            conversation_id: Some(original.clone()),
            ..Default::default()
        }));
        assert_eq!(identity.conversation_id, original);
    }
}
