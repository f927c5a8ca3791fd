//! Backend execution metadata attached to a turn.
//!
//! The backend scatters observability fields across protocol versions: some
//! arrive flat at the root of a frame, some under `meta`, some under
//! `context_debug`. Extraction walks an explicit, prioritized probe list so
//! the precedence rules stay auditable; later (more specific) probes win.
//!
//! Snapshots are merge targets: a later partial snapshot never erases a field
//! an earlier one carried.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting for the assembled context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextTokens {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub memories: Option<u64>,
    #[serde(default)]
    pub recent_turns: Option<u64>,
    #[serde(default)]
    pub summary: Option<u64>,
}

impl ContextTokens {
    fn merge(&mut self, other: ContextTokens) {
        merge_opt(&mut self.total, other.total);
        merge_opt(&mut self.memories, other.memories);
        merge_opt(&mut self.recent_turns, other.recent_turns);
        merge_opt(&mut self.summary, other.summary);
    }

    fn is_empty(&self) -> bool {
        self.total.is_none()
            && self.memories.is_none()
            && self.recent_turns.is_none()
            && self.summary.is_none()
    }
}

/// Read-only structured record describing backend-side execution of a turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub llm_index: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub context_tokens: Option<ContextTokens>,
    /// Raw context-debug payload, kept opaque for the debug drawer.
    #[serde(default)]
    pub context_debug: Option<Value>,
}

impl ObservabilitySnapshot {
    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge `other` into `self`, key by key.
    ///
    /// Fields `other` omits keep their current value; `context_debug` objects
    /// are merged recursively so a later partial debug payload does not drop
    /// keys from an earlier one.
    pub fn merge(&mut self, other: ObservabilitySnapshot) {
        merge_opt(&mut self.turn_id, other.turn_id);
        merge_opt(&mut self.session_id, other.session_id);
        merge_opt(&mut self.conversation_id, other.conversation_id);
        merge_opt(&mut self.agent, other.agent);
        merge_opt(&mut self.llm_index, other.llm_index);
        merge_opt(&mut self.model, other.model);
        merge_opt(&mut self.tokens_used, other.tokens_used);

        match (&mut self.context_tokens, other.context_tokens) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (slot @ None, Some(theirs)) => *slot = Some(theirs),
            _ => {}
        }

        match (&mut self.context_debug, other.context_debug) {
            (Some(mine), Some(theirs)) => merge_json(mine, theirs),
            (slot @ None, Some(theirs)) => *slot = Some(theirs),
            _ => {}
        }
    }
}

fn merge_opt<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value);
    }
}

/// Recursive key-by-key merge of JSON objects; non-objects replace wholesale.
fn merge_json(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

/// Probe roots evaluated in specificity order; later roots override earlier
/// ones for the same field.
const PROBE_ROOTS: &[&[&str]] = &[&[], &["meta"], &["context_debug"]];

/// Probe a loosely-typed frame payload for embedded observability fields.
///
/// Every frame is probed regardless of its primary classification. Returns
/// `None` when no recognized field is present at any probe root.
pub fn extract(payload: &Value) -> Option<ObservabilitySnapshot> {
    let mut snapshot = ObservabilitySnapshot::default();

    for root in PROBE_ROOTS {
        let Some(scope) = resolve_path(payload, root) else {
            continue;
        };
        if !scope.is_object() {
            continue;
        }

        merge_opt(&mut snapshot.turn_id, string_field(scope, "turn_id"));
        merge_opt(&mut snapshot.session_id, string_field(scope, "session_id"));
        merge_opt(
            &mut snapshot.conversation_id,
            string_field(scope, "conversation_id"),
        );
        merge_opt(&mut snapshot.agent, string_field(scope, "agent"));
        merge_opt(
            &mut snapshot.llm_index,
            scope.get("llm_index").and_then(Value::as_i64),
        );
        merge_opt(&mut snapshot.model, string_field(scope, "model"));
        merge_opt(
            &mut snapshot.tokens_used,
            scope.get("tokens_used").and_then(Value::as_u64),
        );

        if let Some(tokens) = scope.get("context_tokens") {
            if let Ok(parsed) = serde_json::from_value::<ContextTokens>(tokens.clone()) {
                if !parsed.is_empty() {
                    match &mut snapshot.context_tokens {
                        Some(mine) => mine.merge(parsed),
                        slot => *slot = Some(parsed),
                    }
                }
            }
        }
    }

    // The debug payload itself only lives at the root or under meta; taking
    // it from the context_debug scope would nest it into itself.
    let debug_payload = payload
        .get("context_debug")
        .or_else(|| payload.get("meta").and_then(|meta| meta.get("context_debug")));
    if let Some(debug) = debug_payload {
        if debug.is_object() {
            snapshot.context_debug = Some(debug.clone());
        }
    }

    if snapshot.is_empty() {
        None
    } else {
        Some(snapshot)
    }
}

/// Build a snapshot from a dedicated `context_debug` frame payload.
pub fn from_context_debug(payload: &Value) -> ObservabilitySnapshot {
    let mut snapshot = extract(payload).unwrap_or_default();
    if snapshot.context_debug.is_none() && payload.is_object() {
        snapshot.context_debug = Some(payload.clone());
    }
    snapshot
}

fn resolve_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn string_field(scope: &Value, key: &str) -> Option<String> {
    scope
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
