// ABOUTME: Deleted-range bookkeeping for context compaction over the model-facing history.
// ABOUTME: Computes monotonic truncation ranges and builds the effective history the model sees.

use serde::{Deserialize, Serialize};

use crate::message::{ContentBlock, MessageContent, MessageRole, StorageMessage};

/// Index of the first message a truncation may remove. The opening
/// task message and the first reply are always kept.
pub const FIRST_REMOVABLE_INDEX: usize = 2;

/// Appended to the first assistant message once anything has been hidden.
pub const TRUNCATION_NOTICE: &str =
    "[NOTE] Some previous conversation history has been removed to keep the context window manageable. The task summary that follows carries forward what matters.";

/// An inclusive range `[start, end]` of history indices hidden from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRange {
    pub start: usize,
    pub end: usize,
}

impl DeletedRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.end
    }

    /// True when `self` hides at least everything `other` hides.
    pub fn subsumes(&self, other: &DeletedRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// How much of the not-yet-hidden tail to keep when extending a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepStrategy {
    /// Hide everything after the anchor.
    None,
    /// Keep the last user/assistant pair.
    LastTwo,
    Half,
    Quarter,
}

/// Compute the next deleted range over `messages`.
///
/// The result always starts at [`FIRST_REMOVABLE_INDEX`], never shrinks
/// relative to `current`, and ends on an assistant message so the visible
/// tail resumes with a user turn. When nothing new can be hidden the
/// current range is returned unchanged.
pub fn next_truncation_range(
    messages: &[StorageMessage],
    current: Option<DeletedRange>,
    keep: KeepStrategy,
) -> Option<DeletedRange> {
    let start_of_rest = current
        .map(|range| range.end + 1)
        .unwrap_or(FIRST_REMOVABLE_INDEX)
        .max(FIRST_REMOVABLE_INDEX);

    if messages.len() <= start_of_rest {
        return current;
    }

    let remaining = messages.len() - start_of_rest;
    let to_remove = match keep {
        KeepStrategy::None => remaining,
        KeepStrategy::LastTwo => remaining.saturating_sub(2),
        // keep removals even so user/assistant pairs stay together
        KeepStrategy::Half => (remaining / 4) * 2,
        KeepStrategy::Quarter => ((remaining * 3) / 4 / 2) * 2,
    };
    if to_remove == 0 {
        return current;
    }

    let mut end = start_of_rest + to_remove - 1;
    while messages[end].role != MessageRole::Assistant {
        if end == start_of_rest {
            return current;
        }
        end -= 1;
    }

    Some(DeletedRange::new(FIRST_REMOVABLE_INDEX, end))
}

/// Build the history the model sees: everything outside `range`, with a
/// truncation notice on the first assistant message when something was hidden.
pub fn apply_deleted_range(
    messages: &[StorageMessage],
    range: Option<DeletedRange>,
) -> Vec<StorageMessage> {
    let Some(range) = range else {
        return messages.to_vec();
    };
    if range.start >= messages.len() || range.is_empty() {
        return messages.to_vec();
    }

    let tail_start = (range.end + 1).min(messages.len());
    let mut visible: Vec<StorageMessage> = messages[..range.start]
        .iter()
        .chain(messages[tail_start..].iter())
        .cloned()
        .collect();

    if let Some(first_reply) = visible.get_mut(1) {
        if first_reply.role == MessageRole::Assistant {
            add_notice(first_reply);
        }
    }
    visible
}

fn add_notice(message: &mut StorageMessage) {
    match &mut message.content {
        MessageContent::Text(text) => {
            text.push_str("\n\n");
            text.push_str(TRUNCATION_NOTICE);
        }
        MessageContent::Blocks(blocks) => blocks.push(ContentBlock::Text {
            text: TRUNCATION_NOTICE.to_string(),
        }),
    }
}
