// crates/core/src/query.rs
//! Filtering, sorting and pagination of conversation lists.

use serde::{Deserialize, Serialize};

use crate::chain::compare_timestamps;
use crate::types::ConversationSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Created,
    #[default]
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Conversation list query, as accepted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListQuery {
    pub project_path: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort_by: Option<SortBy>,
    pub order: Option<SortOrder>,
    pub has_continuation: Option<bool>,
    pub archived: Option<bool>,
    pub pinned: Option<bool>,
}

impl ConversationListQuery {
    fn matches(&self, conversation: &ConversationSummary) -> bool {
        if let Some(project_path) = &self.project_path {
            if &conversation.project_path != project_path {
                return false;
            }
        }
        let info = &conversation.session_info;
        if self.pinned.is_some_and(|p| info.pinned != p) {
            return false;
        }
        if self.archived.is_some_and(|a| info.archived != a) {
            return false;
        }
        if self
            .has_continuation
            .is_some_and(|c| info.continuation_session_id.is_empty() == c)
        {
            return false;
        }
        true
    }

    /// Filter, sort and paginate. Returns the page and the total match count
    /// before pagination.
    pub fn apply(&self, conversations: Vec<ConversationSummary>) -> (Vec<ConversationSummary>, usize) {
        let mut matched: Vec<_> = conversations.into_iter().filter(|c| self.matches(c)).collect();
        let total = matched.len();

        let sort_by = self.sort_by.unwrap_or_default();
        let order = self.order.unwrap_or_default();
        matched.sort_by(|a, b| {
            let by_time = match sort_by {
                SortBy::Created => compare_timestamps(&a.created_at, &b.created_at),
                SortBy::Updated => compare_timestamps(&a.updated_at, &b.updated_at),
            };
            let by_time = match order {
                SortOrder::Asc => by_time,
                SortOrder::Desc => by_time.reverse(),
            };
            by_time.then_with(|| a.session_id.cmp(&b.session_id))
        });

        let offset = self.offset.unwrap_or(0);
        let page = match self.limit {
            Some(limit) => matched.into_iter().skip(offset).take(limit).collect(),
            None => matched.into_iter().skip(offset).collect(),
        };
        (page, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_info::SessionInfo;
    use crate::types::ConversationStatus;
    use pretty_assertions::assert_eq;

    fn conv(id: &str, project: &str, created: &str, updated: &str) -> ConversationSummary {
        ConversationSummary {
            session_id: id.to_string(),
            project_path: project.to_string(),
            summary: String::new(),
            session_info: SessionInfo::fresh(created),
            created_at: created.to_string(),
            updated_at: updated.to_string(),
            message_count: 1,
            total_duration: 0,
            model: "unknown".to_string(),
            status: ConversationStatus::Completed,
            streaming_id: None,
            tool_metrics: None,
        }
    }

    fn ids(page: &[ConversationSummary]) -> Vec<&str> {
        page.iter().map(|c| c.session_id.as_str()).collect()
    }

    fn sample() -> Vec<ConversationSummary> {
        vec![
            conv("a", "/p1", "2025-01-01T00:00:00Z", "2025-01-03T00:00:00Z"),
            conv("b", "/p2", "2025-01-02T00:00:00Z", "2025-01-02T00:00:00Z"),
            conv("c", "/p1", "2025-01-03T00:00:00Z", "2025-01-04T00:00:00Z"),
        ]
    }

    #[test]
    fn test_default_is_updated_desc() {
        let (page, total) = ConversationListQuery::default().apply(sample());
        assert_eq!(ids(&page), vec!["c", "a", "b"]);
        assert_eq!(total, 3);
    }

    #[test]
    fn test_created_asc() {
        let query = ConversationListQuery {
            sort_by: Some(SortBy::Created),
            order: Some(SortOrder::Asc),
            ..Default::default()
        };
        let (page, _) = query.apply(sample());
        assert_eq!(ids(&page), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_broken_by_session_id() {
        let convs = vec![
            conv("z", "/p", "t", "2025-01-01T00:00:00Z"),
            conv("m", "/p", "t", "2025-01-01T00:00:00Z"),
            conv("a", "/p", "t", "2025-01-01T00:00:00Z"),
        ];
        let (page, _) = ConversationListQuery::default().apply(convs);
        assert_eq!(ids(&page), vec!["a", "m", "z"]);
    }

    #[test]
    fn test_project_filter_and_pagination_total() {
        let query = ConversationListQuery {
            project_path: Some("/p1".to_string()),
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        let (page, total) = query.apply(sample());
        assert_eq!(total, 2);
        assert_eq!(ids(&page), vec!["a"]);
    }

    #[test]
    fn test_offset_past_end_is_empty() {
        let query = ConversationListQuery {
            offset: Some(10),
            ..Default::default()
        };
        let (page, total) = query.apply(sample());
        assert!(page.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn test_session_info_flags() {
        let mut convs = sample();
        convs[0].session_info.pinned = true;
        convs[1].session_info.archived = true;
        convs[2].session_info.continuation_session_id = "next".to_string();

        let pinned = ConversationListQuery {
            pinned: Some(true),
            ..Default::default()
        };
        assert_eq!(ids(&pinned.apply(convs.clone()).0), vec!["a"]);

        let unarchived = ConversationListQuery {
            archived: Some(false),
            ..Default::default()
        };
        assert_eq!(ids(&unarchived.apply(convs.clone()).0), vec!["c", "a"]);

        let continued = ConversationListQuery {
            has_continuation: Some(true),
            ..Default::default()
        };
        assert_eq!(ids(&continued.apply(convs).0), vec!["c"]);
    }

    #[test]
    fn test_query_deserializes_camel_case() {
        let query: ConversationListQuery =
            serde_json::from_str(r#"{"projectPath":"/p","sortBy":"created","order":"asc","hasContinuation":false}"#)
                .unwrap();
        assert_eq!(query.project_path.as_deref(), Some("/p"));
        assert_eq!(query.sort_by, Some(SortBy::Created));
        assert_eq!(query.order, Some(SortOrder::Asc));
        assert_eq!(query.has_continuation, Some(false));
    }
}
