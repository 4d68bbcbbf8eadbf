//! Registry of conversations that have a running process.
//!
//! A session becomes active when the supervised process reports its Claude
//! session id, usually before anything is flushed to the JSONL log. Until the
//! log catches up, the registry supplies provisional list entries and details
//! built from the context the session was started with.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;
use claude_relay_core::{
    ConversationDetails, ConversationMetadata, ConversationStatus, ConversationSummary, EntryType,
    LiveConversations, LogEntry, SessionInfo, ToolMetrics,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

const DEFAULT_MODEL: &str = "default";
const UNKNOWN_MODEL: &str = "unknown";

/// Context a session was started with, as supplied by the process supervisor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub initial_prompt: String,
    pub working_directory: String,
    pub model: Option<String>,
    pub inherited_messages: Option<Vec<LogEntry>>,
}

/// Stored context of an active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSessionContext {
    pub streaming_id: String,
    pub claude_session_id: String,
    pub initial_prompt: String,
    pub working_directory: String,
    pub model: String,
    pub registered_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherited_messages: Option<Vec<LogEntry>>,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    SessionStarted {
        streaming_id: String,
        claude_session_id: String,
    },
    SessionEnded {
        streaming_id: String,
        claude_session_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionPair {
    pub claude_session_id: String,
    pub streaming_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub active_sessions_count: usize,
    pub active_streaming_ids_count: usize,
    pub active_contexts_count: usize,
    pub active_sessions: Vec<ActiveSessionPair>,
}

/// Both directions of the streaming id <-> session id mapping, plus contexts.
///
/// Kept in one struct behind one lock so the two maps never disagree.
#[derive(Default)]
struct Mappings {
    session_to_streaming: HashMap<String, String>,
    streaming_to_session: HashMap<String, String>,
    contexts: HashMap<String, LiveSessionContext>,
    /// Edit/Write activity seen on the live stream, by session id.
    tool_metrics: HashMap<String, ToolMetrics>,
}

pub struct SessionRegistry {
    inner: RwLock<Mappings>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Mappings::default()),
            events: broadcast::channel(256).0,
        }
    }

    /// Receive `SessionStarted` / `SessionEnded` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Map `streaming_id` to `claude_session_id`, replacing stale mappings on
    /// either side.
    pub fn register_active_session(
        &self,
        streaming_id: &str,
        claude_session_id: &str,
        context: Option<SessionContext>,
    ) {
        // (streaming id, session id) pairs this registration breaks up.
        let mut displaced = Vec::new();
        let active = {
            let mut inner = self.inner.write().expect("RwLock poisoned");

            if let Some(old_streaming) = inner.session_to_streaming.get(claude_session_id).cloned() {
                if old_streaming != streaming_id {
                    tracing::debug!(
                        claude_session_id,
                        old_streaming_id = %old_streaming,
                        new_streaming_id = streaming_id,
                        "Replacing stream mapping for session"
                    );
                    inner.streaming_to_session.remove(&old_streaming);
                    displaced.push((old_streaming, claude_session_id.to_string()));
                }
            }
            if let Some(old_session) = inner.streaming_to_session.get(streaming_id).cloned() {
                if old_session != claude_session_id {
                    tracing::debug!(
                        streaming_id,
                        old_session_id = %old_session,
                        new_session_id = claude_session_id,
                        "Replacing session mapping for stream"
                    );
                    inner.session_to_streaming.remove(&old_session);
                    inner.contexts.remove(&old_session);
                    inner.tool_metrics.remove(&old_session);
                    displaced.push((streaming_id.to_string(), old_session));
                }
            }

            inner
                .session_to_streaming
                .insert(claude_session_id.to_string(), streaming_id.to_string());
            inner
                .streaming_to_session
                .insert(streaming_id.to_string(), claude_session_id.to_string());

            if let Some(context) = context {
                inner.contexts.insert(
                    claude_session_id.to_string(),
                    LiveSessionContext {
                        streaming_id: streaming_id.to_string(),
                        claude_session_id: claude_session_id.to_string(),
                        initial_prompt: context.initial_prompt,
                        working_directory: context.working_directory,
                        model: context
                            .model
                            .filter(|m| !m.is_empty())
                            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                        registered_at: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                        inherited_messages: context.inherited_messages,
                    },
                );
            }
            inner.session_to_streaming.len()
        };

        for (old_streaming, old_session) in displaced {
            let _ = self.events.send(RegistryEvent::SessionEnded {
                streaming_id: old_streaming,
                claude_session_id: old_session,
            });
        }
        tracing::info!(streaming_id, claude_session_id, active_sessions = active, "Active session registered");
        let _ = self.events.send(RegistryEvent::SessionStarted {
            streaming_id: streaming_id.to_string(),
            claude_session_id: claude_session_id.to_string(),
        });
    }

    /// Forget a stream. Unknown ids are ignored.
    pub fn unregister_active_session(&self, streaming_id: &str) {
        let removed = {
            let mut inner = self.inner.write().expect("RwLock poisoned");
            match inner.streaming_to_session.remove(streaming_id) {
                Some(session_id) => {
                    inner.session_to_streaming.remove(&session_id);
                    inner.contexts.remove(&session_id);
                    inner.tool_metrics.remove(&session_id);
                    Some((session_id, inner.session_to_streaming.len()))
                }
                None => None,
            }
        };

        match removed {
            Some((claude_session_id, active)) => {
                tracing::info!(
                    streaming_id,
                    claude_session_id = %claude_session_id,
                    active_sessions = active,
                    "Active session unregistered"
                );
                let _ = self.events.send(RegistryEvent::SessionEnded {
                    streaming_id: streaming_id.to_string(),
                    claude_session_id,
                });
            }
            None => tracing::debug!(streaming_id, "Unregister for unknown stream ignored"),
        }
    }

    pub fn context(&self, claude_session_id: &str) -> Option<LiveSessionContext> {
        self.inner
            .read()
            .expect("RwLock poisoned")
            .contexts
            .get(claude_session_id)
            .cloned()
    }

    pub fn is_session_active(&self, claude_session_id: &str) -> bool {
        self.inner
            .read()
            .expect("RwLock poisoned")
            .session_to_streaming
            .contains_key(claude_session_id)
    }

    pub fn streaming_id_for(&self, claude_session_id: &str) -> Option<String> {
        self.inner
            .read()
            .expect("RwLock poisoned")
            .session_to_streaming
            .get(claude_session_id)
            .cloned()
    }

    pub fn session_id_for(&self, streaming_id: &str) -> Option<String> {
        self.inner
            .read()
            .expect("RwLock poisoned")
            .streaming_to_session
            .get(streaming_id)
            .cloned()
    }

    pub fn active_session_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .expect("RwLock poisoned")
            .session_to_streaming
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn active_streaming_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .expect("RwLock poisoned")
            .streaming_to_session
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn conversation_status(&self, claude_session_id: &str) -> ConversationStatus {
        if self.is_session_active(claude_session_id) {
            ConversationStatus::Ongoing
        } else {
            ConversationStatus::Completed
        }
    }

    /// Provisional list entries for active sessions the log does not know yet.
    ///
    /// Sessions registered without a context are skipped.
    pub fn conversations_not_in_history(&self, known: &HashSet<String>) -> Vec<ConversationSummary> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut conversations: Vec<ConversationSummary> = inner
            .session_to_streaming
            .iter()
            .filter(|(session_id, _)| !known.contains(*session_id))
            .filter_map(|(session_id, streaming_id)| {
                let context = inner.contexts.get(session_id)?;
                let metrics = inner.tool_metrics.get(session_id).copied();
                Some(provisional_summary(session_id, streaming_id, context, metrics))
            })
            .collect();
        conversations.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        conversations
    }

    /// Provisional detail view of an active session with a stored context.
    pub fn active_conversation_details(&self, claude_session_id: &str) -> Option<ConversationDetails> {
        let context = {
            let inner = self.inner.read().expect("RwLock poisoned");
            if !inner.session_to_streaming.contains_key(claude_session_id) {
                return None;
            }
            inner.contexts.get(claude_session_id)?.clone()
        };

        let mut messages = context.inherited_messages.clone().unwrap_or_default();
        messages.push(
            LogEntry::message(
                EntryType::User,
                format!("active-{claude_session_id}-user"),
                claude_session_id,
                context.registered_at.clone(),
            )
            .with_payload(json!({"role": "user", "content": context.initial_prompt}))
            .with_cwd(context.working_directory.clone()),
        );

        Some(ConversationDetails {
            messages,
            summary: String::new(),
            project_path: context.working_directory,
            metadata: ConversationMetadata {
                total_duration: 0,
                model: non_empty_model(&context.model),
            },
        })
    }

    /// Count the tool calls of an assistant `message` payload against an
    /// active session. Returns false, counting nothing, for inactive sessions.
    pub fn record_assistant_message(&self, claude_session_id: &str, message: &serde_json::Value) -> bool {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        if !inner.session_to_streaming.contains_key(claude_session_id) {
            return false;
        }
        inner
            .tool_metrics
            .entry(claude_session_id.to_string())
            .or_default()
            .record_message(message);
        true
    }

    pub fn tool_metrics(&self, claude_session_id: &str) -> Option<ToolMetrics> {
        self.inner
            .read()
            .expect("RwLock poisoned")
            .tool_metrics
            .get(claude_session_id)
            .copied()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut active_sessions: Vec<_> = inner
            .session_to_streaming
            .iter()
            .map(|(session, streaming)| ActiveSessionPair {
                claude_session_id: session.clone(),
                streaming_id: streaming.clone(),
            })
            .collect();
        active_sessions.sort_by(|a, b| a.claude_session_id.cmp(&b.claude_session_id));
        RegistryStats {
            active_sessions_count: inner.session_to_streaming.len(),
            active_streaming_ids_count: inner.streaming_to_session.len(),
            active_contexts_count: inner.contexts.len(),
            active_sessions,
        }
    }

    /// Drop every mapping without emitting events.
    pub fn clear(&self) {
        *self.inner.write().expect("RwLock poisoned") = Mappings::default();
        tracing::debug!("Session registry cleared");
    }
}

impl LiveConversations for SessionRegistry {
    fn conversation_status(&self, session_id: &str) -> ConversationStatus {
        SessionRegistry::conversation_status(self, session_id)
    }

    fn streaming_id_for(&self, session_id: &str) -> Option<String> {
        SessionRegistry::streaming_id_for(self, session_id)
    }

    fn conversations_not_in_history(&self, known: &HashSet<String>) -> Vec<ConversationSummary> {
        SessionRegistry::conversations_not_in_history(self, known)
    }
}

fn non_empty_model(model: &str) -> String {
    if model.is_empty() {
        UNKNOWN_MODEL.to_string()
    } else {
        model.to_string()
    }
}

fn provisional_summary(
    session_id: &str,
    streaming_id: &str,
    context: &LiveSessionContext,
    tool_metrics: Option<ToolMetrics>,
) -> ConversationSummary {
    let timestamp = context.registered_at.clone();
    ConversationSummary {
        session_id: session_id.to_string(),
        project_path: context.working_directory.clone(),
        summary: String::new(),
        session_info: SessionInfo::fresh(timestamp.clone()),
        created_at: timestamp.clone(),
        updated_at: timestamp,
        message_count: 1,
        total_duration: 0,
        model: non_empty_model(&context.model),
        status: ConversationStatus::Ongoing,
        streaming_id: Some(streaming_id.to_string()),
        tool_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx(prompt: &str) -> SessionContext {
        SessionContext {
            initial_prompt: prompt.to_string(),
            working_directory: "/work/app".to_string(),
            model: None,
            inherited_messages: None,
        }
    }

    #[test]
    fn test_register_then_unregister_leaves_nothing() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", Some(ctx("hi")));
        assert!(registry.is_session_active("s1"));
        assert_eq!(registry.streaming_id_for("s1").as_deref(), Some("st-1"));
        assert_eq!(registry.session_id_for("st-1").as_deref(), Some("s1"));

        registry.unregister_active_session("st-1");
        assert!(registry.active_session_ids().is_empty());
        assert!(registry.active_streaming_ids().is_empty());
        assert!(registry.context("s1").is_none());
        assert_eq!(registry.conversation_status("s1"), ConversationStatus::Completed);
    }

    #[test]
    fn test_unregister_unknown_is_noop_without_event() {
        let registry = SessionRegistry::new();
        let mut rx = registry.subscribe();
        registry.unregister_active_session("nope");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_exactly_one_event_per_transition() {
        let registry = SessionRegistry::new();
        let mut rx = registry.subscribe();

        registry.register_active_session("st-1", "s1", None);
        registry.unregister_active_session("st-1");
        registry.unregister_active_session("st-1");

        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::SessionStarted {
                streaming_id: "st-1".to_string(),
                claude_session_id: "s1".to_string(),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::SessionEnded {
                streaming_id: "st-1".to_string(),
                claude_session_id: "s1".to_string(),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reregistering_session_drops_stale_stream() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-old", "s1", None);
        registry.register_active_session("st-new", "s1", None);

        assert_eq!(registry.streaming_id_for("s1").as_deref(), Some("st-new"));
        assert!(registry.session_id_for("st-old").is_none());
        assert_eq!(registry.active_streaming_ids(), vec!["st-new"]);
    }

    #[test]
    fn test_reusing_stream_drops_stale_session_and_context() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s-old", Some(ctx("first")));
        registry.register_active_session("st-1", "s-new", None);

        assert!(!registry.is_session_active("s-old"));
        assert!(registry.context("s-old").is_none());
        assert_eq!(registry.active_session_ids(), vec!["s-new"]);
        let stats = registry.stats();
        assert_eq!(stats.active_sessions_count, 1);
        assert_eq!(stats.active_streaming_ids_count, 1);
        assert_eq!(stats.active_contexts_count, 0);
    }

    #[test]
    fn test_stream_switching_session_ends_the_old_one() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s-old", None);
        let mut rx = registry.subscribe();

        registry.register_active_session("st-1", "s-new", None);

        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::SessionEnded {
                streaming_id: "st-1".to_string(),
                claude_session_id: "s-old".to_string(),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::SessionStarted {
                streaming_id: "st-1".to_string(),
                claude_session_id: "s-new".to_string(),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_session_moving_streams_ends_the_old_pair() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-old", "s1", None);
        let mut rx = registry.subscribe();

        registry.register_active_session("st-new", "s1", None);

        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::SessionEnded {
                streaming_id: "st-old".to_string(),
                claude_session_id: "s1".to_string(),
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), RegistryEvent::SessionStarted { .. }));
        assert!(rx.try_recv().is_err());
        assert!(registry.is_session_active("s1"));
    }

    #[test]
    fn test_same_pair_again_emits_only_start() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", None);
        let mut rx = registry.subscribe();

        registry.register_active_session("st-1", "s1", None);

        assert!(matches!(rx.try_recv().unwrap(), RegistryEvent::SessionStarted { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tool_metrics_follow_session_lifetime() {
        let registry = SessionRegistry::new();
        let write = json!({"content": [
            {"type": "tool_use", "name": "Write", "input": {"content": "a\nb\n"}}
        ]});

        assert!(!registry.record_assistant_message("s1", &write));
        assert!(registry.tool_metrics("s1").is_none());

        registry.register_active_session("st-1", "s1", Some(ctx("hi")));
        assert!(registry.record_assistant_message("s1", &write));
        assert!(registry.record_assistant_message("s1", &write));

        let metrics = registry.tool_metrics("s1").unwrap();
        assert_eq!(metrics.write_count, 2);
        assert_eq!(metrics.lines_added, 4);

        let listed = registry.conversations_not_in_history(&HashSet::new());
        assert_eq!(listed[0].tool_metrics, Some(metrics));

        registry.unregister_active_session("st-1");
        assert!(registry.tool_metrics("s1").is_none());
    }

    #[test]
    fn test_model_defaults_to_default() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", Some(ctx("hi")));
        assert_eq!(registry.context("s1").unwrap().model, "default");

        let mut with_model = ctx("hi");
        with_model.model = Some("opus".to_string());
        registry.register_active_session("st-2", "s2", Some(with_model));
        assert_eq!(registry.context("s2").unwrap().model, "opus");
    }

    #[test]
    fn test_not_in_history_synthesizes_ongoing_summaries() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", Some(ctx("hi")));
        registry.register_active_session("st-2", "s2", Some(ctx("yo")));
        registry.register_active_session("st-3", "s3", None);

        let known: HashSet<String> = ["s2".to_string()].into_iter().collect();
        let conversations = registry.conversations_not_in_history(&known);

        assert_eq!(conversations.len(), 1);
        let c = &conversations[0];
        assert_eq!(c.session_id, "s1");
        assert_eq!(c.streaming_id.as_deref(), Some("st-1"));
        assert_eq!(c.status, ConversationStatus::Ongoing);
        assert_eq!(c.message_count, 1);
        assert_eq!(c.total_duration, 0);
        assert_eq!(c.summary, "");
        assert_eq!(c.project_path, "/work/app");
        assert_eq!(c.model, "default");
    }

    #[test]
    fn test_not_in_history_empty_when_all_known() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", Some(ctx("hi")));
        registry.register_active_session("st-2", "s2", Some(ctx("yo")));

        let known: HashSet<String> = registry.active_session_ids().into_iter().collect();
        assert!(registry.conversations_not_in_history(&known).is_empty());
    }

    #[test]
    fn test_active_details_append_prompt_after_inherited() {
        let registry = SessionRegistry::new();
        let inherited = LogEntry::message(EntryType::Assistant, "prev", "s0", "2025-01-01T00:00:00Z");
        let mut context = ctx("continue please");
        context.inherited_messages = Some(vec![inherited]);
        registry.register_active_session("st-1", "s1", Some(context));

        let details = registry.active_conversation_details("s1").unwrap();
        let ids: Vec<_> = details.messages.iter().map(|m| m.uuid.as_str()).collect();
        assert_eq!(ids, vec!["prev", "active-s1-user"]);
        assert_eq!(details.messages[1].text_content(), Some("continue please"));
        assert_eq!(details.project_path, "/work/app");
        assert_eq!(details.metadata.total_duration, 0);
        assert_eq!(details.metadata.model, "default");
    }

    #[test]
    fn test_active_details_require_context() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", None);
        assert!(registry.active_conversation_details("s1").is_none());
        assert!(registry.active_conversation_details("unknown").is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = SessionRegistry::new();
        registry.register_active_session("st-1", "s1", Some(ctx("hi")));
        registry.clear();
        assert_eq!(registry.stats().active_sessions_count, 0);
        assert!(registry.context("s1").is_none());
    }
}
