//! History bounding: what part of a persisted conversation travels upstream
//! on each turn.

use curacall_common::{ChatMessage, ChatRole};
use curacall_db::MessageRow;

/// The bounded projection of a conversation's history: at most one summary
/// plus the last `turns_to_keep * 2` non-system messages, in order.
#[derive(Debug, Default)]
pub struct BoundedHistory {
    pub summary: Option<ChatMessage>,
    pub recent: Vec<ChatMessage>,
    /// Total non-system rows before truncation; drives the summarization
    /// trigger.
    pub non_system_count: usize,
}

impl BoundedHistory {
    /// Flattens into the message list sent to a provider: summary first (if
    /// any), then the kept window.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.recent.len() + 1);
        if let Some(summary) = self.summary {
            messages.push(summary);
        }
        messages.extend(self.recent);
        messages
    }
}

/// Applies the truncation rule to rows already ordered by creation time:
/// the latest system row becomes the summary, everything else keeps only
/// its `turns_to_keep * 2` tail.
pub fn bounded_history(rows: &[MessageRow], turns_to_keep: usize) -> BoundedHistory {
    let summary = rows
        .iter()
        .rev()
        .find(|m| m.role == "system")
        .map(|m| ChatMessage::system(m.content.clone()));

    let non_system: Vec<&MessageRow> = rows.iter().filter(|m| m.role != "system").collect();
    let non_system_count = non_system.len();
    let keep = turns_to_keep.max(1) * 2;
    let start = non_system.len().saturating_sub(keep);
    let recent = non_system[start..]
        .iter()
        .map(|m| ChatMessage {
            role: ChatRole::parse(&m.role),
            content: m.content.clone(),
        })
        .collect();

    BoundedHistory {
        summary,
        recent,
        non_system_count,
    }
}
