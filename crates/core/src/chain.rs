// crates/core/src/chain.rs
//! Reconstruct per-session message chains from flat log entries.
//!
//! Each message names its parent by uuid. A healthy session forms a single
//! path from one root to one leaf; sidechain (sub-agent) messages hang off
//! that path and are left out of the chain. When the links do not form such a
//! path the session is still returned, ordered by timestamp instead, and
//! flagged as degraded.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::DateTime;
use tracing::{debug, warn};

use crate::discovery::decode_project_path;
use crate::message_filter;
use crate::types::{ConversationChain, EntryType, LogEntry};

/// Character prefix used when a session summary falls back to its first prompt.
pub const SUMMARY_FALLBACK_CHARS: usize = 100;

const UNKNOWN_MODEL: &str = "unknown";

/// Why a session's parent links could not be walked.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChainFault {
    NoRoot,
    MultipleRoots(usize),
    Branch { uuid: String, children: usize },
    Cycle { uuid: String },
    Unreachable { reached: usize, total: usize },
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoot => write!(f, "no root message"),
            Self::MultipleRoots(n) => write!(f, "{n} root messages"),
            Self::Branch { uuid, children } => write!(f, "message {uuid} has {children} children"),
            Self::Cycle { uuid } => write!(f, "cycle through message {uuid}"),
            Self::Unreachable { reached, total } => {
                write!(f, "only {reached} of {total} messages reachable from root")
            }
        }
    }
}

/// `leafUuid -> summary` from every summary record; later records win.
pub fn summary_index(entries: &[LogEntry]) -> HashMap<String, String> {
    let mut summaries = HashMap::new();
    for entry in entries.iter().filter(|e| e.entry_type == EntryType::Summary) {
        if let (Some(leaf), Some(summary)) = (&entry.leaf_uuid, &entry.summary) {
            summaries.insert(leaf.clone(), summary.clone());
        }
    }
    summaries
}

/// Build one chain per session, in order of each session's first appearance.
///
/// Sessions without any non-sidechain message produce no chain.
pub fn build_conversation_chains(entries: &[LogEntry]) -> Vec<ConversationChain> {
    let summaries = summary_index(entries);

    let mut order: Vec<&str> = Vec::new();
    let mut sessions: HashMap<&str, Vec<&LogEntry>> = HashMap::new();
    for entry in entries.iter().filter(|e| e.is_message()) {
        if entry.session_id.is_empty() {
            debug!(uuid = %entry.uuid, "Skipping message without session id");
            continue;
        }
        sessions
            .entry(entry.session_id.as_str())
            .or_insert_with(|| {
                order.push(entry.session_id.as_str());
                Vec::new()
            })
            .push(entry);
    }

    order
        .into_iter()
        .filter_map(|session_id| build_chain(session_id, &sessions[session_id], &summaries))
        .collect()
}

fn build_chain(
    session_id: &str,
    session_entries: &[&LogEntry],
    summaries: &HashMap<String, String>,
) -> Option<ConversationChain> {
    let primary: Vec<&LogEntry> = session_entries
        .iter()
        .copied()
        .filter(|e| !e.is_sidechain)
        .collect();
    if primary.is_empty() {
        debug!(session_id, "Session has only sidechain messages, skipping");
        return None;
    }

    let (ordered, degraded): (Vec<&LogEntry>, bool) = match link_chain(session_entries, &primary) {
        Ok(indices) => (indices.into_iter().map(|i| primary[i]).collect(), false),
        Err(fault) => {
            warn!(
                session_id,
                reason = %fault,
                messages = primary.len(),
                "Conversation links unusable, falling back to timestamp order"
            );
            (timestamp_order(&primary), true)
        }
    };

    let messages: Vec<LogEntry> = ordered.into_iter().cloned().collect();
    let summary = resolve_summary(&messages, summaries);
    let model = messages
        .iter()
        .find_map(|m| m.model())
        .unwrap_or(UNKNOWN_MODEL)
        .to_string();
    let project_path = messages
        .iter()
        .find_map(|m| m.cwd.as_deref().filter(|c| !c.is_empty()))
        .map(str::to_string)
        .or_else(|| {
            session_entries
                .iter()
                .find_map(|e| e.source_project.as_deref())
                .map(decode_project_path)
        })
        .unwrap_or_default();
    let total_duration_ms = session_entries
        .iter()
        .fold(0u64, |acc, e| acc.saturating_add(e.duration_ms.unwrap_or(0)));

    Some(ConversationChain {
        session_id: session_id.to_string(),
        created_at: messages.first().map(|m| m.timestamp.clone()).unwrap_or_default(),
        updated_at: messages.last().map(|m| m.timestamp.clone()).unwrap_or_default(),
        messages,
        project_path,
        summary,
        total_duration_ms,
        model,
        degraded,
    })
}

/// Walk parent links from the single root, returning indices into `primary`.
///
/// A parent counts as present if any entry of the session (sidechains
/// included) carries that uuid; only non-sidechain children are followed.
fn link_chain(session_entries: &[&LogEntry], primary: &[&LogEntry]) -> Result<Vec<usize>, ChainFault> {
    let known: HashSet<&str> = session_entries.iter().map(|e| e.uuid.as_str()).collect();

    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (idx, entry) in primary.iter().enumerate() {
        match entry.parent_uuid.as_deref() {
            Some(parent) if known.contains(parent) => children.entry(parent).or_default().push(idx),
            _ => roots.push(idx),
        }
    }

    let mut current = match roots.as_slice() {
        [root] => *root,
        [] => return Err(ChainFault::NoRoot),
        many => return Err(ChainFault::MultipleRoots(many.len())),
    };

    let mut visited = vec![false; primary.len()];
    let mut walk = Vec::with_capacity(primary.len());
    loop {
        visited[current] = true;
        walk.push(current);
        let uuid = primary[current].uuid.as_str();
        match children.get(uuid).map(Vec::as_slice) {
            None | Some([]) => break,
            Some([next]) if visited[*next] => {
                return Err(ChainFault::Cycle {
                    uuid: uuid.to_string(),
                })
            }
            Some([next]) => current = *next,
            Some(many) => {
                return Err(ChainFault::Branch {
                    uuid: uuid.to_string(),
                    children: many.len(),
                })
            }
        }
    }

    if walk.len() != primary.len() {
        return Err(ChainFault::Unreachable {
            reached: walk.len(),
            total: primary.len(),
        });
    }
    Ok(walk)
}

/// Stable timestamp-ascending order.
///
/// RFC 3339 timestamps compare chronologically. Unparseable timestamps sort
/// before parseable ones and compare as raw strings among themselves.
fn timestamp_order<'a>(primary: &[&'a LogEntry]) -> Vec<&'a LogEntry> {
    let mut ordered = primary.to_vec();
    ordered.sort_by(|a, b| compare_timestamps(&a.timestamp, &b.timestamp));
    ordered
}

pub(crate) fn compare_timestamps(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| DateTime::parse_from_rfc3339(s).ok();
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn resolve_summary(messages: &[LogEntry], summaries: &HashMap<String, String>) -> String {
    if let Some(summary) = messages.last().and_then(|leaf| summaries.get(&leaf.uuid)) {
        return summary.clone();
    }
    messages
        .iter()
        .filter(|m| m.entry_type == EntryType::User && message_filter::should_keep(m))
        .find_map(|m| m.text_content())
        .map(|text| text.chars().take(SUMMARY_FALLBACK_CHARS).collect())
        .unwrap_or_default()
}
