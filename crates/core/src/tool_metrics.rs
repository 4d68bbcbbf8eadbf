// crates/core/src/tool_metrics.rs
//! Line-level activity of the file editing tools in a conversation.
//!
//! `Edit` and each entry of a `MultiEdit` count as one edit and contribute
//! the line diff between `old_string` and `new_string`. `Write` counts as one
//! write and adds every line of its `content`. Other tools are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::types::{EntryType, LogEntry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetrics {
    pub lines_added: u64,
    pub lines_removed: u64,
    pub edit_count: u64,
    pub write_count: u64,
}

impl ToolMetrics {
    /// Totals over the assistant messages of a stored conversation.
    pub fn from_messages(messages: &[LogEntry]) -> Self {
        let mut metrics = Self::default();
        for entry in messages.iter().filter(|e| e.entry_type == EntryType::Assistant) {
            if let Some(message) = &entry.message {
                metrics.record_message(message);
            }
        }
        metrics
    }

    /// Count every `tool_use` block of an assistant message payload.
    /// String content carries no tool calls.
    pub fn record_message(&mut self, message: &Value) {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
            let input = block.get("input").unwrap_or(&Value::Null);
            self.record_tool_use(name, input);
        }
    }

    pub fn record_tool_use(&mut self, tool_name: &str, input: &Value) {
        match tool_name {
            "Edit" => {
                self.edit_count += 1;
                self.record_edit(input);
            }
            "MultiEdit" => {
                if let Some(edits) = input.get("edits").and_then(Value::as_array) {
                    self.edit_count += edits.len() as u64;
                    for edit in edits {
                        self.record_edit(edit);
                    }
                }
            }
            "Write" => {
                self.write_count += 1;
                if let Some(content) = input.get("content").and_then(Value::as_str) {
                    self.lines_added += count_lines(content);
                }
            }
            _ => {}
        }
    }

    fn record_edit(&mut self, input: &Value) {
        let old = input.get("old_string").and_then(Value::as_str);
        let new = input.get("new_string").and_then(Value::as_str);
        let (Some(old), Some(new)) = (old, new) else {
            return;
        };
        for change in TextDiff::from_lines(old, new).iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => self.lines_added += 1,
                ChangeTag::Delete => self.lines_removed += 1,
                ChangeTag::Equal => {}
            }
        }
    }
}

/// Lines of `text`; a trailing newline does not start another line.
fn count_lines(text: &str) -> u64 {
    text.lines().count() as u64
}
