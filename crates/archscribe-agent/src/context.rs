// ABOUTME: Context window management: decides when a task's history is too large for the model.
// ABOUTME: Deduplicates repeated file reads first and computes truncation ranges after summarization.

use std::collections::HashMap;

use archscribe_core::message::ContentBlock;
use archscribe_core::prompt::DUPLICATE_FILE_READ_NOTICE;
use archscribe_core::truncation::next_truncation_range;
use archscribe_core::{
    ConversationMessage, DeletedRange, KeepStrategy, MessageContent, StorageMessage,
};
use archscribe_store::{MessageStateHandler, StoreError};

use crate::provider::ModelInfo;
use crate::tools::read_file_header;

const READ_FILE_TOOL: &str = "read_file";

/// Result of a file-read deduplication pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Earlier reads whose bodies were replaced by the notice.
    pub replaced: usize,
    /// Characters removed from the model-facing history.
    pub chars_saved: usize,
}

impl DedupOutcome {
    pub fn tokens_saved(&self) -> u64 {
        self.chars_saved.div_ceil(4) as u64
    }
}

/// Per-task compaction policy.
#[derive(Debug, Clone, Default)]
pub struct ContextWindowManager {
    override_ratio: Option<f64>,
}

impl ContextWindowManager {
    /// `override_ratio`, when set, replaces the reserve-buffer policy with
    /// `ratio * context_window`.
    pub fn new(override_ratio: Option<f64>) -> Self {
        Self { override_ratio }
    }

    /// Token count above which the history must be compacted.
    pub fn threshold(&self, model: &ModelInfo) -> u64 {
        let window = model.context_window;
        if let Some(ratio) = self.override_ratio {
            return (window as f64 * ratio).floor() as u64;
        }
        match window {
            64_000 => window - 27_000,
            128_000 => window - 30_000,
            200_000 => window - 40_000,
            _ => window
                .saturating_sub(40_000)
                .max((window as f64 * 0.8).floor() as u64),
        }
    }

    /// Tokens reported by the request-tracking entry at `last_api_request`.
    /// Cache counters only count for providers that bill input and cached
    /// tokens separately.
    pub fn tokens_used(
        conversation: &[ConversationMessage],
        last_api_request: Option<usize>,
        model: &ModelInfo,
    ) -> u64 {
        let Some(info) = last_api_request
            .and_then(|i| conversation.get(i))
            .and_then(|m| m.api_request.as_ref())
        else {
            return 0;
        };
        if model.supports_prompt_cache {
            info.usage.total()
        } else {
            info.usage.input_tokens + info.usage.output_tokens
        }
    }

    pub fn should_compact(
        &self,
        conversation: &[ConversationMessage],
        model: &ModelInfo,
        last_api_request: Option<usize>,
    ) -> bool {
        let used = Self::tokens_used(conversation, last_api_request, model);
        let threshold = self.threshold(model);
        tracing::debug!(used, threshold, window = model.context_window, "context check");
        used >= threshold
    }

    /// Tier 1. Replace all but the latest read of each file with a short
    /// notice. Returns true when the history still needs truncating, i.e.
    /// the projected usage after deduplication is not below the threshold.
    pub fn attempt_file_read_optimization(
        &self,
        handler: &MessageStateHandler,
        conversation: &[ConversationMessage],
        model: &ModelInfo,
        last_api_request: Option<usize>,
    ) -> Result<bool, StoreError> {
        let outcome = dedupe_file_reads(handler)?;
        let used = Self::tokens_used(conversation, last_api_request, model);
        let projected = used.saturating_sub(outcome.tokens_saved());
        let threshold = self.threshold(model);
        tracing::info!(
            replaced = outcome.replaced,
            tokens_saved = outcome.tokens_saved(),
            projected,
            threshold,
            "file read deduplication"
        );
        Ok(projected >= threshold)
    }

    /// Range to hide after a summary, extending the handler's active range.
    pub fn truncation_after_summary(handler: &MessageStateHandler) -> Option<DeletedRange> {
        let state = handler.snapshot();
        next_truncation_range(&state.api_messages, state.deleted_range, KeepStrategy::None)
    }
}

/// Path of a successful read_file result, taken from its header.
fn read_path(content: &str) -> Option<&str> {
    let path = content.lines().next()?.strip_prefix("File: ")?;
    content.starts_with(&read_file_header(path)).then_some(path)
}

/// Indices of visible read_file results that a later read of the same path
/// supersedes.
pub(crate) fn superseded_reads(
    messages: &[StorageMessage],
    deleted: Option<DeletedRange>,
) -> Vec<(usize, String)> {
    let mut latest: HashMap<&str, usize> = HashMap::new();
    let mut reads: Vec<(usize, &str)> = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        if deleted.is_some_and(|range| range.contains(index)) {
            continue;
        }
        let Some((tool, content)) = message.as_tool_result() else {
            continue;
        };
        if tool != READ_FILE_TOOL {
            continue;
        }
        if let Some(path) = read_path(content) {
            latest.insert(path, index);
            reads.push((index, path));
        }
    }
    reads
        .into_iter()
        .filter(|(index, path)| latest.get(path) != Some(index))
        .map(|(index, path)| (index, path.to_string()))
        .collect()
}

fn elided_read(path: &str) -> String {
    format!("File: {path}\n{DUPLICATE_FILE_READ_NOTICE}")
}

/// Rewrite superseded reads in place through the handler.
pub fn dedupe_file_reads(handler: &MessageStateHandler) -> Result<DedupOutcome, StoreError> {
    let state = handler.snapshot();
    let mut outcome = DedupOutcome::default();
    for (index, path) in superseded_reads(&state.api_messages, state.deleted_range) {
        let replacement = elided_read(&path);
        let mut saved = 0;
        handler.update_api_message(index, |message| {
            if let MessageContent::Blocks(blocks) = &mut message.content {
                for block in blocks.iter_mut() {
                    if let ContentBlock::ToolResult { content, .. } = block {
                        saved = content.chars().count().saturating_sub(replacement.chars().count());
                        *content = replacement.clone();
                    }
                }
            }
        })?;
        if saved > 0 {
            outcome.replaced += 1;
            outcome.chars_saved += saved;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archscribe_core::{TokenUsage, message::estimate_tokens};
    use archscribe_store::MemoryStorage;
    use std::sync::Arc;
    use ulid::Ulid;

    fn model(window: u64, cache: bool) -> ModelInfo {
        ModelInfo {
            id: "test-model".to_string(),
            context_window: window,
            max_tokens: 4096,
            supports_prompt_cache: cache,
        }
    }

    fn read_result(path: &str, body: &str) -> StorageMessage {
        let content = format!("{}\n{}", read_file_header(path), body);
        StorageMessage::tool_result(Ulid::new().to_string(), "read_file", content, false)
    }

    fn handler_with(messages: Vec<StorageMessage>) -> MessageStateHandler {
        let handler = MessageStateHandler::new(Ulid::new(), Arc::new(MemoryStorage::new()));
        handler.set_api_messages(messages).unwrap();
        handler
    }

    #[test]
    fn thresholds_follow_window_size() {
        let manager = ContextWindowManager::default();
        assert_eq!(manager.threshold(&model(64_000, false)), 37_000);
        assert_eq!(manager.threshold(&model(128_000, false)), 98_000);
        assert_eq!(manager.threshold(&model(200_000, true)), 160_000);
        assert_eq!(manager.threshold(&model(1_000_000, true)), 960_000);
        assert_eq!(manager.threshold(&model(10_000, false)), 8_000);
    }

    #[test]
    fn override_ratio_replaces_buffers() {
        let manager = ContextWindowManager::new(Some(0.5));
        assert_eq!(manager.threshold(&model(200_000, true)), 100_000);
    }

    #[test]
    fn should_compact_uses_last_request_entry() {
        let manager = ContextWindowManager::default();
        let small = model(10_000, true);
        let conversation = vec![
            ConversationMessage::task("draw it"),
            ConversationMessage::api_request(TokenUsage {
                input_tokens: 9_000,
                output_tokens: 100,
                ..Default::default()
            }),
            ConversationMessage::api_request(TokenUsage {
                input_tokens: 3_000,
                output_tokens: 100,
                ..Default::default()
            }),
        ];
        assert!(!manager.should_compact(&conversation, &small, Some(2)));
        assert!(manager.should_compact(&conversation, &small, Some(1)));
        assert!(!manager.should_compact(&conversation, &small, None));
    }

    #[test]
    fn cache_counters_count_only_when_billed_separately() {
        let conversation = vec![ConversationMessage::api_request(TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            cache_write_tokens: Some(1_000),
            cache_read_tokens: Some(2_000),
        })];
        assert_eq!(
            ContextWindowManager::tokens_used(&conversation, Some(0), &model(200_000, true)),
            3_150
        );
        assert_eq!(
            ContextWindowManager::tokens_used(&conversation, Some(0), &model(128_000, false)),
            150
        );
    }

    #[test]
    fn dedup_keeps_only_latest_read_per_path() {
        let body = "   1 | fn main() {}\n".repeat(50);
        let handler = handler_with(vec![
            StorageMessage::user_text("task"),
            StorageMessage::assistant_text("reading"),
            read_result("/repo/main.rs", &body),
            read_result("/repo/lib.rs", &body),
            StorageMessage::assistant_text("again"),
            read_result("/repo/main.rs", &body),
            read_result("/repo/main.rs", &body),
        ]);
        let before = estimate_tokens(&handler.api_messages());

        let outcome = dedupe_file_reads(&handler).unwrap();
        assert_eq!(outcome.replaced, 2);

        let messages = handler.api_messages();
        assert!(estimate_tokens(&messages) < before);
        for index in [2, 5] {
            let (_, content) = messages[index].as_tool_result().unwrap();
            assert_eq!(content, elided_read("/repo/main.rs"));
        }
        for index in [3, 6] {
            let (_, content) = messages[index].as_tool_result().unwrap();
            assert!(content.ends_with(&body));
        }

        // a second pass finds nothing new to save
        assert_eq!(dedupe_file_reads(&handler).unwrap(), DedupOutcome::default());
    }

    #[test]
    fn hidden_reads_are_left_alone() {
        let messages = vec![
            StorageMessage::user_text("task"),
            StorageMessage::assistant_text("ok"),
            read_result("/a.rs", "x"),
            StorageMessage::assistant_text("ok"),
            read_result("/a.rs", "x"),
        ];
        let hidden = Some(DeletedRange::new(2, 3));
        assert!(superseded_reads(&messages, hidden).is_empty());
        assert_eq!(
            superseded_reads(&messages, None),
            vec![(2, "/a.rs".to_string())]
        );
    }

    #[test]
    fn error_results_are_not_reads() {
        let messages = vec![StorageMessage::tool_result(
            "c1",
            "read_file",
            "Error reading file: No such file\n\nFile: /a.rs",
            true,
        )];
        assert!(superseded_reads(&messages, None).is_empty());
        assert_eq!(read_path("File: /a.rs\nnot a separator"), None);
    }

    #[test]
    fn optimization_without_duplicates_is_insufficient() {
        let manager = ContextWindowManager::default();
        let small = model(10_000, false);
        let handler = handler_with(vec![
            StorageMessage::user_text("task"),
            StorageMessage::assistant_text("ok"),
            read_result("/a.rs", "x"),
        ]);
        let conversation = vec![ConversationMessage::api_request(TokenUsage {
            input_tokens: 9_000,
            output_tokens: 0,
            ..Default::default()
        })];
        assert!(manager
            .attempt_file_read_optimization(&handler, &conversation, &small, Some(0))
            .unwrap());
    }

    #[test]
    fn optimization_that_frees_enough_is_sufficient() {
        let manager = ContextWindowManager::default();
        let small = model(10_000, false);
        let big = "y".repeat(8_000);
        let handler = handler_with(vec![
            StorageMessage::user_text("task"),
            StorageMessage::assistant_text("ok"),
            read_result("/big.rs", &big),
            read_result("/big.rs", &big),
        ]);
        let conversation = vec![ConversationMessage::api_request(TokenUsage {
            input_tokens: 8_500,
            output_tokens: 0,
            ..Default::default()
        })];
        assert!(!manager
            .attempt_file_read_optimization(&handler, &conversation, &small, Some(0))
            .unwrap());
    }

    #[test]
    fn truncation_after_summary_extends_active_range() {
        let handler = handler_with(vec![
            StorageMessage::user_text("task"),
            StorageMessage::assistant_text("a1"),
            StorageMessage::user_text("r1"),
            StorageMessage::assistant_text("a2"),
            StorageMessage::user_text("r2"),
            StorageMessage::assistant_text("a3"),
        ]);
        let range = ContextWindowManager::truncation_after_summary(&handler).unwrap();
        assert_eq!(range, DeletedRange::new(2, 5));
        handler.set_deleted_range(range).unwrap();

        handler
            .add_api_message(StorageMessage::user_text("continue"))
            .unwrap();
        handler
            .add_api_message(StorageMessage::assistant_text("a4"))
            .unwrap();
        let next = ContextWindowManager::truncation_after_summary(&handler).unwrap();
        assert_eq!(next, DeletedRange::new(2, 7));
        assert!(next.subsumes(&range));
    }
}
