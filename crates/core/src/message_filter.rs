// crates/core/src/message_filter.rs
//! Drops local slash-command noise from conversation views.
//!
//! Claude records local commands (`/clear`, `/model`, ...) and their output as
//! user messages. They are not part of the conversation the user had with the
//! model, so detail views and message counts leave them out.

use crate::types::{EntryType, LogEntry};

const FILTERED_PREFIXES: &[&str] = &["Caveat: ", "<command-name>", "<local-command-stdout>"];

/// Whether a message belongs in a conversation view.
///
/// Only user messages with text content are ever dropped.
pub fn should_keep(entry: &LogEntry) -> bool {
    if entry.entry_type != EntryType::User {
        return true;
    }
    match entry.text_content() {
        Some(text) => {
            let text = text.trim();
            !FILTERED_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
        }
        None => true,
    }
}

pub fn filter_messages(messages: Vec<LogEntry>) -> Vec<LogEntry> {
    messages.into_iter().filter(should_keep).collect()
}
