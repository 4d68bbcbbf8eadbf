// crates/core/src/history.rs
//! Conversation history queries over the file cache.
//!
//! Every query refreshes the cache (cheap when nothing changed) and rebuilds
//! chains from the flattened entries. Live state is supplied by the caller
//! through [`LiveConversations`] so this crate stays free of the server.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::cache::FileCache;
use crate::chain::{build_conversation_chains, compare_timestamps};
use crate::error::RefreshError;
use crate::message_filter::filter_messages;
use crate::query::ConversationListQuery;
use crate::session_info::{SessionInfo, SessionInfoStore};
use crate::tool_metrics::ToolMetrics;
use crate::types::{
    ConversationChain, ConversationDetails, ConversationMetadata, ConversationStatus,
    ConversationSummary, LogEntry,
};

/// Live overlay consulted while listing history.
pub trait LiveConversations: Send + Sync {
    fn conversation_status(&self, session_id: &str) -> ConversationStatus;

    fn streaming_id_for(&self, session_id: &str) -> Option<String>;

    /// Provisional summaries for live sessions whose ids are not in `known`.
    fn conversations_not_in_history(&self, known: &HashSet<String>) -> Vec<ConversationSummary>;
}

/// Overlay with no live sessions. Every conversation is completed.
pub struct NoLiveConversations;

impl LiveConversations for NoLiveConversations {
    fn conversation_status(&self, _session_id: &str) -> ConversationStatus {
        ConversationStatus::Completed
    }

    fn streaming_id_for(&self, _session_id: &str) -> Option<String> {
        None
    }

    fn conversations_not_in_history(&self, _known: &HashSet<String>) -> Vec<ConversationSummary> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<ConversationSummary>,
    pub total: usize,
}

/// Header fields of a stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub summary: String,
    pub project_path: String,
    pub model: String,
    pub total_duration: u64,
}

/// A project directory conversations were held in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDirectory {
    pub path: String,
    /// Shortest trailing run of path components no other directory shares.
    pub shortname: String,
    pub last_date: String,
    pub conversation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDirectoriesResponse {
    pub directories: Vec<WorkingDirectory>,
    pub total_count: usize,
}

#[derive(Clone)]
pub struct HistoryReader {
    cache: FileCache,
    session_info: Arc<dyn SessionInfoStore>,
}

impl HistoryReader {
    pub fn new(cache: FileCache, session_info: Arc<dyn SessionInfoStore>) -> Self {
        Self { cache, session_info }
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Drop all cached file records so the next query re-parses everything.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Every stored conversation, rebuilt from a fresh cache refresh.
    pub async fn chains(&self) -> Result<Vec<ConversationChain>, RefreshError> {
        let entries = self.cache.refresh().await?;
        Ok(build_conversation_chains(&entries))
    }

    async fn chain(&self, session_id: &str) -> Result<Option<ConversationChain>, RefreshError> {
        let chain = self
            .chains()
            .await?
            .into_iter()
            .find(|c| c.session_id == session_id);
        if chain.is_none() {
            debug!(session_id, "Conversation not found in history");
        }
        Ok(chain)
    }

    /// List stored conversations merged with live ones not yet on disk.
    pub async fn list_conversations(
        &self,
        query: &ConversationListQuery,
        live: &dyn LiveConversations,
    ) -> Result<ConversationPage, RefreshError> {
        let chains = self.chains().await?;
        let known: HashSet<String> = chains.iter().map(|c| c.session_id.clone()).collect();

        let mut conversations: Vec<ConversationSummary> = chains
            .into_iter()
            .map(|chain| self.summarize(chain, live))
            .collect();
        conversations.extend(live.conversations_not_in_history(&known));

        let (conversations, total) = query.apply(conversations);
        Ok(ConversationPage {
            conversations,
            total,
        })
    }

    /// Messages of one stored conversation, local command noise removed.
    pub async fn fetch_conversation(&self, session_id: &str) -> Result<Option<Vec<LogEntry>>, RefreshError> {
        Ok(self
            .chain(session_id)
            .await?
            .map(|chain| filter_messages(chain.messages)))
    }

    pub async fn conversation_details(
        &self,
        session_id: &str,
    ) -> Result<Option<ConversationDetails>, RefreshError> {
        Ok(self.chain(session_id).await?.map(|chain| ConversationDetails {
            metadata: ConversationMetadata {
                total_duration: chain.total_duration_ms,
                model: chain.model,
            },
            summary: chain.summary,
            project_path: chain.project_path,
            messages: filter_messages(chain.messages),
        }))
    }

    pub async fn conversation_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, RefreshError> {
        Ok(self.chain(session_id).await?.map(|chain| SessionMetadata {
            summary: chain.summary,
            project_path: chain.project_path,
            model: chain.model,
            total_duration: chain.total_duration_ms,
        }))
    }

    /// Working directory of a stored conversation, if it has one.
    pub async fn working_directory(&self, session_id: &str) -> Result<Option<String>, RefreshError> {
        Ok(self
            .chain(session_id)
            .await?
            .map(|chain| chain.project_path)
            .filter(|path| !path.is_empty()))
    }

    /// Distinct project paths of stored conversations, most recently used first.
    pub async fn working_directories(&self) -> Result<WorkingDirectoriesResponse, RefreshError> {
        let chains = self.chains().await?;

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (String, usize)> = HashMap::new();
        for chain in chains.into_iter().filter(|c| !c.project_path.is_empty()) {
            match groups.get_mut(&chain.project_path) {
                Some((last_date, count)) => {
                    *count += 1;
                    if compare_timestamps(&chain.updated_at, last_date) == Ordering::Greater {
                        *last_date = chain.updated_at;
                    }
                }
                None => {
                    order.push(chain.project_path.clone());
                    groups.insert(chain.project_path, (chain.updated_at, 1));
                }
            }
        }

        let shortnames = shortest_unique_suffixes(&order);
        let mut directories: Vec<WorkingDirectory> = order
            .into_iter()
            .zip(shortnames)
            .filter_map(|(path, shortname)| {
                let (last_date, conversation_count) = groups.remove(&path)?;
                Some(WorkingDirectory {
                    path,
                    shortname,
                    last_date,
                    conversation_count,
                })
            })
            .collect();
        directories.sort_by(|a, b| compare_timestamps(&b.last_date, &a.last_date));

        Ok(WorkingDirectoriesResponse {
            total_count: directories.len(),
            directories,
        })
    }

    fn summarize(&self, chain: ConversationChain, live: &dyn LiveConversations) -> ConversationSummary {
        let session_info = self
            .session_info
            .session_info(&chain.session_id)
            .unwrap_or_else(|| SessionInfo::fresh(chain.created_at.clone()));
        let status = live.conversation_status(&chain.session_id);
        let streaming_id = match status {
            ConversationStatus::Ongoing => live.streaming_id_for(&chain.session_id),
            _ => None,
        };
        let tool_metrics = ToolMetrics::from_messages(&chain.messages);
        let message_count = filter_messages(chain.messages).len();

        ConversationSummary {
            session_id: chain.session_id,
            project_path: chain.project_path,
            summary: chain.summary,
            session_info,
            created_at: chain.created_at,
            updated_at: chain.updated_at,
            message_count,
            total_duration: chain.total_duration_ms,
            model: chain.model,
            status,
            streaming_id,
            tool_metrics: Some(tool_metrics),
        }
    }
}

/// For each path, the fewest trailing components that no other path ends with.
///
/// A path that is itself a suffix of another keeps all of its components.
pub fn shortest_unique_suffixes(paths: &[String]) -> Vec<String> {
    let components: Vec<Vec<&str>> = paths
        .iter()
        .map(|p| p.split(['/', '\\']).filter(|c| !c.is_empty()).collect())
        .collect();

    paths
        .iter()
        .zip(&components)
        .map(|(path, parts)| {
            if parts.is_empty() {
                return path.clone();
            }
            (1..=parts.len())
                .map(|k| &parts[parts.len() - k..])
                .find(|suffix| components.iter().filter(|other| other.ends_with(suffix)).count() == 1)
                .unwrap_or(parts.as_slice())
                .join("/")
        })
        .collect()
}
